use bitflags::bitflags;

bitflags! {
    /// TRAPEN bitfield. Two bit positions (`UNKNOWN1`, `UNKNOWN2`) are
    /// exposed on the wire and reachable through the `unk1`/`unk2` monitor
    /// commands, but their effect on silicon is undocumented; this driver
    /// preserves the bit positions without inferring semantics for them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Traps: u16 {
        const UNKNOWN1 = 0x0001;
        const HWBP     = 0x0002;
        const STEP     = 0x0004;
        const UNKNOWN2 = 0x0010;
        const BP0      = 0x0100;
        const BP1      = 0x0200;
        const EXTBRK   = 0x1000;
        const SWBP     = 0x2000;
        const JMP      = 0x4000;
        const INT      = 0x8000;
    }
}
