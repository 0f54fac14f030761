//! Module for handling Commodore nibbles
//!
//! Each 4-bit value is written to the disk as a 5-bit code with no more than two
//! consecutive zeros.  Four bytes (eight nibbles) pack into exactly five disk bytes.
//! Decoding is forgiving: a 5-bit pattern that is not a code yields 0.
//! Such damage shows up in the sector checksums.

const FWD_GCR: [u8;16] = [
    0b01010, 0b01011, 0b10010, 0b10011,
    0b01110, 0b01111, 0b10110, 0b10111,
    0b01001, 0b11001, 0b11010, 0b11011,
    0b01101, 0b11101, 0b11110, 0b10101
];

const REV_GCR: [u8;32] = [
    0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,
    0x00,0x08,0x00,0x01,0x00,0x0C,0x04,0x05,
    0x00,0x00,0x02,0x03,0x00,0x0F,0x06,0x07,
    0x00,0x09,0x0A,0x0B,0x00,0x0D,0x0E,0x00
];

/// encode a 4-bit value as a 5-bit code aligned to LSB
pub fn encode_nibble(val: u8) -> u8 {
    FWD_GCR[(val & 0x0f) as usize]
}

/// decode a 5-bit code aligned to LSB, invalid codes yield 0
pub fn decode_nibble(code: u8) -> u8 {
    REV_GCR[(code & 0x1f) as usize]
}

/// Encode 4 bytes as 5 GCR bytes, codes are packed MSB first.
pub fn encode4(src: &[u8;4]) -> [u8;5] {
    let mut acc: u64 = 0;
    for b in src {
        acc = (acc << 5) | encode_nibble(b >> 4) as u64;
        acc = (acc << 5) | encode_nibble(b & 0x0f) as u64;
    }
    let mut ans = [0;5];
    for i in 0..5 {
        ans[i] = (acc >> (32 - 8*i)) as u8;
    }
    ans
}

/// Decode 5 GCR bytes into 4 bytes.  Never fails, see module notes.
pub fn decode4(src: &[u8;5]) -> [u8;4] {
    let mut acc: u64 = 0;
    for b in src {
        acc = (acc << 8) | *b as u64;
    }
    let mut ans = [0;4];
    for i in 0..4 {
        let hi = ((acc >> (35 - 10*i)) & 0x1f) as u8;
        let lo = ((acc >> (30 - 10*i)) & 0x1f) as u8;
        ans[i] = (decode_nibble(hi) << 4) | decode_nibble(lo);
    }
    ans
}

#[test]
fn code_table_is_invertible() {
    for val in 0..16 {
        assert_eq!(decode_nibble(encode_nibble(val)),val);
    }
}

#[test]
fn known_group() {
    // header block marker
    assert_eq!(encode4(&[0x08,0x00,0x00,0x00]),[0x52,0x54,0xa5,0x29,0x4a]);
    assert_eq!(decode4(&[0x52,0x54,0xa5,0x29,0x4a]),[0x08,0x00,0x00,0x00]);
}

#[test]
fn invalid_codes_decode_to_zero() {
    // 0xff is all ones, 11111 is not a code
    assert_eq!(decode4(&[0xff;5]),[0;4]);
    assert_eq!(decode4(&[0;5]),[0;4]);
}
