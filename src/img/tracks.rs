//! # Track Buffers
//!
//! This module holds the raw GCR content of disk tracks as it would stream past the
//! read/write head, along with the standard geometry of 1541 disks.
//!
//! A `TrackBuffer` is a fixed capacity array that is long enough for the longest legal
//! track.  Only the first `len` bytes are on the disk; the rest is padding.
//! Every byte also carries a speed zone, which is how native bit images describe
//! tracks that were mastered with mixed bit rates.
//!
//! All circular addressing of a track goes through `RingCursor`.

use serde::{Serialize,Deserialize};
use crate::img;
use crate::DYNERR;

pub mod gcr;

/// capacity of a track buffer, also the longest legal track
pub const NUM_MAX_BYTES_TRACK: usize = 7928;
/// shortest legal track
pub const MIN_TRACK_BYTES: usize = 5000;
/// stride of one sector frame within a formatted track
pub const NUM_BYTES_SECTOR_GCR: usize = 360;
/// highest track the sector maps describe
pub const MAX_TRACKS: usize = 42;
/// tracks on a standard disk
pub const NUM_TRACKS: usize = 35;
/// tracks on an extended disk
pub const EXT_TRACKS: usize = 40;
/// lowest half track the stepper can reach
pub const MIN_HALF_TRACK: usize = 2;
/// highest half track the stepper can reach
pub const MAX_HALF_TRACK: usize = 84;
/// track buffers per drive, one for each entry of a G64 track table (half tracks 2 to 85)
pub const HALF_TRACK_SLOTS: usize = 84;

/// bit rate of each speed zone in bits per second
pub const ROT_SPEED_BPS: [u32;4] = [250000, 266667, 285714, 307692];
/// formatted track length in each speed zone
pub const RAW_TRACK_SIZE: [usize;4] = [6250, 6666, 7142, 7692];

/// Sectors on a given track (1 based), or 0 if the track is out of range.
pub fn sectors_per_track(track: usize) -> usize {
    match track {
        1..=17 => 21,
        18..=24 => 19,
        25..=30 => 18,
        31..=MAX_TRACKS => 17,
        _ => 0
    }
}

/// Speed zone of a given track (1 based) on a standard disk.
pub fn speed_zone(track: usize) -> u8 {
    match track {
        0..=17 => 3,
        18..=24 => 2,
        25..=30 => 1,
        _ => 0
    }
}

/// Buffer index of a whole track (1 based), which sits on half track `2*track`.
pub fn track_slot(track: usize) -> usize {
    2*track - MIN_HALF_TRACK
}

/// Number of sectors preceding the given track (1 based), used to locate sectors in flat images.
pub fn sectors_before(track: usize) -> usize {
    (1..track).map(sectors_per_track).sum()
}

/// Position on a ring of `len` bytes.  All wraparound happens here, so the invariant
/// `pos < len` holds no matter how the cursor is moved.
#[derive(Clone,Copy,Debug,PartialEq,Eq,Serialize,Deserialize)]
pub struct RingCursor {
    pos: usize,
    len: usize
}

impl RingCursor {
    pub fn new(pos: usize,len: usize) -> Self {
        let len = usize::max(len,1);
        Self { pos: pos % len, len }
    }
    pub fn pos(&self) -> usize {
        self.pos
    }
    pub fn len(&self) -> usize {
        self.len
    }
    /// move forward by `n` bytes
    pub fn advance(&mut self,n: usize) {
        self.pos = (self.pos + n % self.len) % self.len;
    }
    /// move back by one byte
    pub fn retreat(&mut self) {
        self.pos = match self.pos {
            0 => self.len - 1,
            p => p - 1
        };
    }
    /// move back by `n` bytes
    pub fn rewind(&mut self,n: usize) {
        self.pos = (self.pos + self.len - n % self.len) % self.len;
    }
    /// cursor on the byte preceding this one
    pub fn prev(&self) -> Self {
        let mut ans = *self;
        ans.retreat();
        ans
    }
    pub fn read(&self,buf: &[u8]) -> u8 {
        buf[self.pos]
    }
    pub fn write(&self,buf: &mut [u8],val: u8) {
        buf[self.pos] = val;
    }
    /// read the byte under the cursor and advance, returns true in the flag if we wrapped
    pub fn next(&mut self,buf: &[u8]) -> (u8,bool) {
        let val = buf[self.pos];
        self.advance(1);
        (val,self.pos==0)
    }
}

/// Raw GCR bytes of one half track with a speed zone for every byte.
#[derive(Clone)]
pub struct TrackBuffer {
    data: Vec<u8>,
    zones: Vec<u8>,
    len: usize,
    dirty: bool
}

impl TrackBuffer {
    /// Unformatted track (all zero) of the given length and uniform zone
    pub fn new(len: usize,zone: u8) -> Self {
        Self {
            data: vec![0;NUM_MAX_BYTES_TRACK],
            zones: vec![zone & 3;NUM_MAX_BYTES_TRACK],
            len: usize::min(usize::max(len,1),NUM_MAX_BYTES_TRACK),
            dirty: false
        }
    }
    /// Track as it comes from a bulk eraser (all sync bits) with standard length and zone
    pub fn standard(track: usize) -> Self {
        let zone = speed_zone(track);
        let mut ans = Self::new(RAW_TRACK_SIZE[zone as usize],zone);
        ans.fill(0xff);
        ans
    }
    /// Build from raw bytes, the length must be legal.
    pub fn from_bytes(bytes: &[u8],zones: &[u8]) -> Result<Self,DYNERR> {
        if bytes.len() < MIN_TRACK_BYTES || bytes.len() > NUM_MAX_BYTES_TRACK {
            log::error!("track length {} is not supported",bytes.len());
            return Err(Box::new(img::Error::TrackLength(bytes.len())));
        }
        let mut ans = Self::new(bytes.len(),0);
        ans.data[0..bytes.len()].copy_from_slice(bytes);
        for i in 0..usize::min(zones.len(),NUM_MAX_BYTES_TRACK) {
            ans.zones[i] = zones[i] & 3;
        }
        Ok(ans)
    }
    pub fn len(&self) -> usize {
        self.len
    }
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
    pub fn set_dirty(&mut self,dirty: bool) {
        self.dirty = dirty;
    }
    /// bytes that are actually on the track
    pub fn bytes(&self) -> &[u8] {
        &self.data[0..self.len]
    }
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data[0..self.len]
    }
    pub fn zones(&self) -> &[u8] {
        &self.zones[0..self.len]
    }
    /// zone of the first byte, which is the zone of the whole track unless it is mixed
    pub fn zone(&self) -> u8 {
        self.zones[0]
    }
    /// true if every byte of the track is in the same zone
    pub fn uniform_zone(&self) -> bool {
        let z = self.zones[0];
        self.zones[0..self.len].iter().all(|x| *x==z)
    }
    pub fn set_zone(&mut self,zone: u8) {
        self.zones.fill(zone & 3);
    }
    pub fn set_zones(&mut self,zones: &[u8]) {
        for i in 0..usize::min(zones.len(),NUM_MAX_BYTES_TRACK) {
            self.zones[i] = zones[i] & 3;
        }
    }
    /// Fill the whole capacity with a value, does not change the length
    pub fn fill(&mut self,val: u8) {
        self.data.fill(val);
    }
    /// Change the length; bytes past the new length are kept in the padding.
    pub fn set_len(&mut self,len: usize) -> Result<(),DYNERR> {
        if len==0 || len > NUM_MAX_BYTES_TRACK {
            log::error!("track length {} is out of range",len);
            return Err(Box::new(img::Error::TrackLength(len)));
        }
        self.len = len;
        Ok(())
    }
    /// Copy `src` starting at byte `offset` without passing the capacity.
    /// Out of bounds requests are refused so that nothing spills into another track.
    pub fn put(&mut self,offset: usize,src: &[u8]) -> Result<(),DYNERR> {
        if offset + src.len() > NUM_MAX_BYTES_TRACK {
            log::error!("refusing to write {} bytes at track offset {}",src.len(),offset);
            return Err(Box::new(img::Error::TrackAccess));
        }
        self.data[offset..offset+src.len()].copy_from_slice(src);
        Ok(())
    }
    /// cursor at the start of the track
    pub fn cursor(&self) -> RingCursor {
        RingCursor::new(0,self.len)
    }
}

#[test]
fn ring_cursor_wraps() {
    let mut curs = RingCursor::new(6248,6250);
    curs.advance(3);
    assert_eq!(curs.pos(),1);
    curs.retreat();
    curs.retreat();
    assert_eq!(curs.pos(),6249);
    curs.advance(6250*3+2);
    assert_eq!(curs.pos(),1);
}

#[test]
fn geometry() {
    assert_eq!(sectors_before(18),357);
    assert_eq!(sectors_before(36),683);
    assert_eq!(sectors_before(41),768);
    assert_eq!(speed_zone(18),2);
    assert_eq!(RAW_TRACK_SIZE[speed_zone(1) as usize],7692);
    assert_eq!(track_slot(1),0);
    assert_eq!(track_slot(18),34);
    assert_eq!(track_slot(MAX_TRACKS),HALF_TRACK_SLOTS-2);
}

#[test]
fn put_is_bounded() {
    let mut trk = TrackBuffer::standard(1);
    assert!(trk.put(NUM_MAX_BYTES_TRACK-2,&[1,2,3]).is_err());
    assert!(trk.put(NUM_MAX_BYTES_TRACK-3,&[1,2,3]).is_ok());
}
