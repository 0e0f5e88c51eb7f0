//! Abstract-machine and ABI constants.

/// Number of 32-bit scratch cells (`M[0..MEMWORDS)`) addressable by `LD`/`LDX`/`ST`/`STX`.
///
/// Part of the ABI with callers: filter bytecode may not reference scratch
/// indices `>= MEMWORDS`.
pub const MEMWORDS: usize = 16;

/// Minimum number of physical scratch registers the emitter ever reserves.
pub const MIN_NSCRATCHES: u8 = 2;

/// Maximum number of physical scratch registers the emitter ever reserves.
pub const MAX_NSCRATCHES: u8 = 5;

/// Sentinel length used for "no packet read seen yet in this block".
pub const NO_CHECK_LENGTH: u32 = 0;
