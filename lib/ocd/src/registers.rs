//! Address constants for the OCD register window and the UPDI CSR space.
//!
//! The OCD window lives in the target's *data* address space, starting at
//! [`OCD`]; the CSR addresses below are on the UPDI interface itself and are
//! reached through `ldcs`/`stcs`, independent of target memory.

pub const OCD: u32 = 0x0F80;
pub const OCD_BP0A: u32 = OCD + 0x00;
pub const OCD_BP0AT: u32 = OCD + 0x02;
pub const OCD_BP1A: u32 = OCD + 0x04;
pub const OCD_BP1AT: u32 = OCD + 0x06;
pub const OCD_TRAPEN: u32 = OCD + 0x08;
pub const OCD_TRAPENL: u32 = OCD + 0x08;
pub const OCD_TRAPENH: u32 = OCD + 0x09;
pub const OCD_CAUSE: u32 = OCD + 0x0C;
pub const OCD_PC: u32 = OCD + 0x14;
pub const OCD_SP: u32 = OCD + 0x18;
pub const OCD_SREG: u32 = OCD + 0x1C;
pub const OCD_R0: u32 = OCD + 0x20;

pub const UPDI_CTRLA: u8 = 0x2;
pub const ASI_OCD_CTRLA: u8 = 0x4;
pub const ASI_OCD_STATUS: u8 = 0x5;
pub const ASI_RESET_REQ: u8 = 0x8;
pub const ASI_SYS_STATUS: u8 = 0xB;
pub const ASI_OCD_MESSAGE: u8 = 0xD;

pub const UPDI_CTRLA_GTVAL_2CYCLES: u8 = 0x6;
pub const ASI_OCD_STOP: u8 = 0x01;
pub const ASI_OCD_STOPPED: u8 = 0x01;
pub const ASI_OCD_RUN: u8 = 0x02;
pub const ASI_RSTREQ_RESET: u8 = 0x59;
pub const ASI_RSTREQ_RUN: u8 = 0x00;
pub const ASI_SYS_SYSRST: u8 = 0x20;
