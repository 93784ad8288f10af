use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::protocol::{Request, Response};

/// One connection to the daemon. Requests are answered in order.
pub struct Client {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
}

impl Client {
    pub fn connect(socket: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket).with_context(|| {
            format!("cannot connect to {} (is the daemon running?)", socket.display())
        })?;
        let reader = BufReader::new(stream.try_clone().context("cannot clone the socket")?);
        Ok(Self { stream, reader })
    }

    pub fn send(&mut self, req: &Request) -> Result<Response> {
        let mut line = serde_json::to_string(req).context("cannot encode request")?;
        line.push('\n');
        self.stream
            .write_all(line.as_bytes())
            .context("cannot send request")?;

        let mut reply = String::new();
        let read = self
            .reader
            .read_line(&mut reply)
            .context("cannot read reply")?;
        if read == 0 {
            bail!("daemon closed the connection");
        }

        serde_json::from_str(&reply)
            .with_context(|| format!("bad reply from daemon: {}", reply.trim_end()))
    }
}
