//! Tag byte layout.
//!
//! The leading byte of every message selects its class. Small values are
//! discrete tags; the high bits open ranges whose low bits carry an id or a
//! count.
//!
//! ```text
//! 1xxxxxxx  key id (entry assignment)
//! 01xxxxxx  table id (table assignment)
//! 001xxxxx  confirmation count, 0x3F is PING
//! 0001xxxx  denial count
//! 0000xxxx  discrete tags below
//! ```

pub const STRING: u8 = 0;
pub const INT: u8 = 1;
pub const DOUBLE: u8 = 2;
pub const TABLE: u8 = 3;
pub const BOOLEAN_FALSE: u8 = 4;
pub const BOOLEAN_TRUE: u8 = 5;
pub const ASSIGNMENT: u8 = 6;
/// Reserved, never sent.
pub const EMPTY: u8 = 7;
/// Reserved, never sent.
pub const DATA: u8 = 8;
pub const OLD_DATA: u8 = 9;
pub const TRANSACTION: u8 = 10;
/// Reserved, never sent.
pub const REMOVAL: u8 = 11;
pub const TABLE_REQUEST: u8 = 12;

pub const ID: u8 = 0x80;
pub const TABLE_ID: u8 = 0x40;
pub const CONFIRMATION: u8 = 0x20;
pub const DENIAL: u8 = 0x10;
pub const PING: u8 = CONFIRMATION | (CONFIRMATION - 1);

/// Returns true if `byte` lies in the range opened by `tag`.
pub fn in_range(tag: u8, byte: u8) -> bool {
    byte & !(tag | (tag - 1)) == 0 && byte & tag != 0
}
