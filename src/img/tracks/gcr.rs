//! ## module for GCR tracks
//!
//! This handles the byte-level layout of a Commodore GCR track.
//! A formatted sector occupies `NUM_BYTES_SECTOR_GCR` bytes laid out as
//!
//! `sync(5) header(10) gap(9) sync(5) data(325) gap(6)`
//!
//! where the header is the GCR form of `[08,chk,sec,trk,id2,id1,0f,0f]` and the data block
//! is the GCR form of `[07,payload(256),chk,00,00]`.
//!
//! Searching a track treats it as a ring, since the head sees no beginning or end.
//! Decoding never fails outright; bad checksums and markers are reported to the caller.

use crate::img::ControllerStatus;
use super::{RingCursor,NUM_BYTES_SECTOR_GCR};

mod gcr_nibbles;

pub use gcr_nibbles::{encode4,decode4};

pub const SYNC_BYTE: u8 = 0xff;
pub const GAP_BYTE: u8 = 0x55;
pub const HEADER_MARKER: u8 = 0x08;
pub const DATA_MARKER: u8 = 0x07;
const SYNC_LEN: usize = 5;
const HEADER_GAP_LEN: usize = 9;
const TAIL_GAP_LEN: usize = 6;
/// GCR bytes in an encoded data block
pub const DATA_BLOCK_GCR: usize = 325;
/// how far past a header we look for the data sync
const DATA_SYNC_SEARCH: usize = 500;

/// Result of decoding a data block
pub struct SectorDecode {
    /// block marker, should be `DATA_MARKER`
    pub status: u8,
    pub data: [u8;256],
    /// checksum as found on the disk
    pub checksum: u8,
    /// true if `checksum` matches the payload
    pub checksum_ok: bool
}

impl SectorDecode {
    /// marker and checksum both check out
    pub fn is_good(&self) -> bool {
        self.status==DATA_MARKER && self.checksum_ok
    }
}

/// running XOR of the payload
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0,|acc,x| acc ^ x)
}

/// Encode one sector frame with nothing wrong with it.
pub fn encode_sector(payload: &[u8;256],track: u8,sector: u8,id1: u8,id2: u8) -> [u8;NUM_BYTES_SECTOR_GCR] {
    encode_sector_with_error(payload,track,sector,id1,id2,ControllerStatus::Ok)
}

/// Encode one sector frame, damaging it so that a real controller would report `err`.
/// Codes that are expressed at the track level (no sync) are left to the caller.
pub fn encode_sector_with_error(payload: &[u8;256],track: u8,sector: u8,id1: u8,id2: u8,err: ControllerStatus) -> [u8;NUM_BYTES_SECTOR_GCR] {
    let mut ans = [GAP_BYTE;NUM_BYTES_SECTOR_GCR];
    let mut ptr = 0;
    ans[ptr..ptr+SYNC_LEN].fill(SYNC_BYTE);
    ptr += SYNC_LEN;

    let id1_chk = match err {
        ControllerStatus::IdMismatch => id1 ^ 0xff,
        _ => id1
    };
    let mut hdr_chk = sector ^ track ^ id2 ^ id1_chk;
    if err==ControllerStatus::HeaderChecksum {
        hdr_chk ^= 0xff;
    }
    let hdr_marker = match err {
        ControllerStatus::HeaderNotFound => 0xff,
        _ => HEADER_MARKER
    };
    ans[ptr..ptr+5].copy_from_slice(&encode4(&[hdr_marker,hdr_chk,sector,track]));
    ptr += 5;
    ans[ptr..ptr+5].copy_from_slice(&encode4(&[id2,id1,0x0f,0x0f]));
    ptr += 5;
    ans[ptr..ptr+HEADER_GAP_LEN].fill(GAP_BYTE);
    ptr += HEADER_GAP_LEN;
    ans[ptr..ptr+SYNC_LEN].fill(SYNC_BYTE);
    ptr += SYNC_LEN;

    let mut block = [0u8;260];
    block[0] = match err {
        ControllerStatus::DataNotFound => 0xff,
        _ => DATA_MARKER
    };
    block[1..257].copy_from_slice(payload);
    block[257] = match err {
        ControllerStatus::DataChecksum => checksum(payload) ^ 0xff,
        _ => checksum(payload)
    };
    for i in 0..65 {
        let mut quad = [0;4];
        quad.copy_from_slice(&block[i*4..i*4+4]);
        ans[ptr..ptr+5].copy_from_slice(&encode4(&quad));
        ptr += 5;
    }
    ans[ptr..ptr+TAIL_GAP_LEN].fill(GAP_BYTE);
    ans
}

/// Read 5 bytes starting at the cursor with wraparound, the cursor is advanced.
fn read_group(track: &[u8],curs: &mut RingCursor) -> [u8;5] {
    let mut ans = [0;5];
    for i in 0..5 {
        ans[i] = curs.next(track).0;
    }
    ans
}

/// Decode the data block that starts at byte `start` of the track (just past the data sync).
/// The block may wrap around the end of the track.
pub fn decode_sector(track: &[u8],start: usize) -> SectorDecode {
    let mut curs = RingCursor::new(start,track.len());
    let mut block = [0u8;260];
    for i in 0..65 {
        let quad = decode4(&read_group(track,&mut curs));
        block[i*4..i*4+4].copy_from_slice(&quad);
    }
    let mut data = [0;256];
    data.copy_from_slice(&block[1..257]);
    SectorDecode {
        status: block[0],
        data,
        checksum: block[257],
        checksum_ok: checksum(&data)==block[257]
    }
}

/// Decode the 8 header bytes that follow a sync at `start`.
pub fn decode_header(track: &[u8],start: usize) -> [u8;8] {
    let mut curs = RingCursor::new(start,track.len());
    let mut ans = [0;8];
    ans[0..4].copy_from_slice(&decode4(&read_group(track,&mut curs)));
    ans[4..8].copy_from_slice(&decode4(&read_group(track,&mut curs)));
    ans
}

/// Search the track for the header of the given sector, returning a cursor positioned
/// just past the first header group.  A track that is all sync (killer track) or that
/// has no matching header yields `None`.
pub fn find_sector_header(track: &[u8],trk: u8,sector: u8) -> Option<RingCursor> {
    let len = track.len();
    if len==0 {
        return None;
    }
    let mut curs = RingCursor::new(0,len);
    let mut sync_count = 0;
    let mut wrap_over = false;
    while !wrap_over {
        // find a sync byte, but do not wrap while looking
        while curs.read(track) != SYNC_BYTE {
            let (_,wrapped) = curs.next(track);
            if wrapped {
                return None;
            }
        }
        while curs.read(track) == SYNC_BYTE {
            let (_,wrapped) = curs.next(track);
            wrap_over |= wrapped;
            sync_count += 1;
            if sync_count >= len {
                log::trace!("killer track detected while seeking sector {}",sector);
                return None;
            }
        }
        let mut group = [0;5];
        for i in 0..5 {
            let (val,wrapped) = curs.next(track);
            group[i] = val;
            wrap_over |= wrapped;
        }
        let hdr = decode4(&group);
        if hdr[0]==HEADER_MARKER && hdr[2]==sector && hdr[3]==trk {
            return Some(curs);
        }
    }
    None
}

/// Starting from a header position, find the data sync and return a cursor on the first
/// byte past it.  Gives up if no sync shows up within a reasonable distance.
pub fn find_sector_data(track: &[u8],mut curs: RingCursor) -> Option<RingCursor> {
    let mut count = 0;
    while curs.read(track) != SYNC_BYTE {
        curs.advance(1);
        count += 1;
        if count >= DATA_SYNC_SEARCH {
            return None;
        }
    }
    let mut sync_count = 0;
    while curs.read(track) == SYNC_BYTE {
        curs.advance(1);
        sync_count += 1;
        if sync_count >= track.len() {
            return None;
        }
    }
    Some(curs)
}

/// Locate and decode a sector in one step.
pub fn read_sector(track: &[u8],trk: u8,sector: u8) -> Option<SectorDecode> {
    let hdr = find_sector_header(track,trk,sector)?;
    let dat = find_sector_data(track,hdr)?;
    Some(decode_sector(track,dat.pos()))
}

#[cfg(test)]
fn test_payload(seed: u8) -> [u8;256] {
    let mut ans = [0;256];
    for i in 0..256 {
        ans[i] = (i as u8).wrapping_mul(7).wrapping_add(seed);
    }
    ans
}

#[test]
fn group_roundtrip() {
    // every byte value in every position, plus a spread of mixed groups
    for v in 0..=255u8 {
        for pos in 0..4 {
            let mut x = [0x5a;4];
            x[pos] = v;
            assert_eq!(decode4(&encode4(&x)),x);
        }
    }
    let mut state: u32 = 12345;
    for _ in 0..4096 {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        let x = state.to_le_bytes();
        assert_eq!(decode4(&encode4(&x)),x);
    }
}

#[test]
fn sector_roundtrip() {
    let payload = test_payload(3);
    let frame = encode_sector(&payload,18,4,0x41,0x42);
    assert_eq!(frame.len(),NUM_BYTES_SECTOR_GCR);
    assert_eq!(frame[0..5],[0xff;5]);
    assert_eq!(frame[24..29],[0xff;5]);
    let hdr = decode_header(&frame,5);
    assert_eq!(hdr,[0x08,4^18^0x42^0x41,4,18,0x42,0x41,0x0f,0x0f]);
    let dec = decode_sector(&frame,29);
    assert!(dec.is_good());
    assert_eq!(dec.data,payload);
}

#[test]
fn wrapped_sector() {
    let payload = test_payload(99);
    let frame = encode_sector(&payload,1,0,0x30,0x31);
    // rotate the frame so the data block straddles the end of the ring
    let mut track = vec![0x55;6250];
    let shift = 6250 - 100;
    for i in 0..frame.len() {
        track[(shift + i) % 6250] = frame[i];
    }
    let dec = read_sector(&track,1,0).expect("sector not found");
    assert!(dec.is_good());
    assert_eq!(dec.data,payload);
}

#[test]
fn error_shaping() {
    let payload = test_payload(0);
    let frame = encode_sector_with_error(&payload,5,2,0x30,0x31,ControllerStatus::DataChecksum);
    let dec = decode_sector(&frame,29);
    assert_eq!(dec.status,DATA_MARKER);
    assert!(!dec.checksum_ok);
    assert_eq!(dec.data,payload);
    let frame = encode_sector_with_error(&payload,5,2,0x30,0x31,ControllerStatus::DataNotFound);
    assert_eq!(decode_sector(&frame,29).status,0xff);
    let frame = encode_sector_with_error(&payload,5,2,0x30,0x31,ControllerStatus::HeaderChecksum);
    let hdr = decode_header(&frame,5);
    assert_eq!(hdr[1],2^5^0x31^0x30^0xff);
    let frame = encode_sector_with_error(&payload,5,2,0x30,0x31,ControllerStatus::HeaderNotFound);
    assert!(find_sector_header(&frame,5,2).is_none());
}

#[test]
fn killer_track() {
    let track = vec![0xff;6250];
    assert!(find_sector_header(&track,1,0).is_none());
    let track = vec![0x00;6250];
    assert!(find_sector_header(&track,1,0).is_none());
}
