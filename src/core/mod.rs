pub mod acpi_call;
pub mod ec;
pub mod fan;
pub mod features;
pub mod lock;
pub mod regs;
pub mod wmi;
