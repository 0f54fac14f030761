//! ## Disk rotation
//!
//! Converts elapsed drive clock ticks into bits passing under the head.  Nothing ticks
//! on its own: the state is brought up to date whenever a register access needs it.
//!
//! Rates are fixed point, `ACCUM_MAX` units per bit.  The table for a zone gives the
//! whole bits and the fractional remainder for any tick count up to the table size.
//! Every entry is an exact multiple of the per-tick rate, so rotating in several small
//! steps lands on the same state as one large step.
//!
//! Switching between read and write takes effect one byte late, as it does in the drive
//! electronics.  `finish_mode` only records the switch; the next byte time is spent in
//! the old mode and then the new mode is adopted.

use std::collections::HashMap;
use std::sync::{Arc,Mutex,OnceLock};
use serde::{Serialize,Deserialize};
use crate::img::tracks::{TrackBuffer,RingCursor,ROT_SPEED_BPS};

pub const ROTATION_TABLE_SIZE: usize = 0x1000;
pub const ACCUM_MAX: u32 = 0x10000;
/// nominal drive clock
pub const DRIVE_CLOCK_HZ: u32 = 1_000_000;

#[derive(Clone,Copy,Debug,PartialEq,Eq,Serialize,Deserialize)]
pub enum Mode {
    Read,
    Write
}

impl Mode {
    fn toggled(&self) -> Self {
        match self {
            Self::Read => Self::Write,
            Self::Write => Self::Read
        }
    }
}

#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub struct RotationEntry {
    pub bits: u32,
    pub accum: u32
}

/// Bits moved for each tick count in one zone.
pub struct RotationTable {
    entries: Vec<RotationEntry>
}

impl RotationTable {
    pub fn get(&self,ticks: usize) -> RotationEntry {
        self.entries[ticks]
    }
}

/// The tables depend on nothing but the zone bit rates and the drive clock.
#[derive(Clone,Copy,Debug,PartialEq,Eq,Hash)]
pub struct TableKey {
    pub speeds: [u32;4],
    pub clock_hz: u32
}

impl Default for TableKey {
    fn default() -> Self {
        Self { speeds: ROT_SPEED_BPS, clock_hz: DRIVE_CLOCK_HZ }
    }
}

pub type ZoneTables = [RotationTable;4];

/// Build the tables for all four zones.
pub fn build_tables(key: TableKey) -> ZoneTables {
    let clock = u64::max(key.clock_hz as u64,1);
    key.speeds.map(|speed| {
        let rate = speed as u64 * ACCUM_MAX as u64 / clock;
        let entries = (0..ROTATION_TABLE_SIZE as u64).map(|j| {
            let total = j * rate;
            RotationEntry {
                bits: (total / ACCUM_MAX as u64) as u32,
                accum: (total % ACCUM_MAX as u64) as u32
            }
        }).collect();
        RotationTable { entries }
    })
}

static TABLES: OnceLock<Mutex<HashMap<TableKey,Arc<ZoneTables>>>> = OnceLock::new();

/// Memoized `build_tables`, drives with the same key share one set of tables.
pub fn rotation_tables(key: TableKey) -> Arc<ZoneTables> {
    let memo = TABLES.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = match memo.lock() {
        Ok(m) => m,
        Err(poisoned) => poisoned.into_inner()
    };
    map.entry(key).or_insert_with(|| {
        log::debug!("building rotation tables for {} Hz",key.clock_hz);
        Arc::new(build_tables(key))
    }).clone()
}

/// Scalars needed to resume rotation, tables are not included.
#[derive(Clone,Debug,PartialEq,Serialize,Deserialize)]
pub struct RotationSnapshot {
    pub zone: u8,
    pub accum: u32,
    pub bits_moved: u64,
    pub finish_pending: u32,
    pub mode: Mode,
    pub last_mode: Mode,
    pub last_clk: u64,
    pub head_offset: usize,
    pub track_len: usize,
    pub write_value: u8,
    pub read_value: u8,
    pub byte_ready_level: bool,
    pub byte_ready_edge: bool
}

pub struct RotationState {
    key: TableKey,
    tables: Arc<ZoneTables>,
    zone: u8,
    accum: u32,
    bits_moved: u64,
    finish_pending: u32,
    /// mode requested by the firmware
    mode: Mode,
    /// mode the electronics are actually in
    last_mode: Mode,
    last_clk: u64,
    head: RingCursor,
    write_value: u8,
    read_value: u8,
    byte_ready_level: bool,
    byte_ready_edge: bool,
    finish_commits: u64
}

impl RotationState {
    pub fn new(key: TableKey,track_len: usize) -> Self {
        Self {
            key,
            tables: rotation_tables(key),
            zone: 0,
            accum: 0,
            bits_moved: 0,
            finish_pending: 0,
            mode: Mode::Read,
            last_mode: Mode::Read,
            last_clk: 0,
            head: RingCursor::new(0,track_len),
            write_value: 0x55,
            read_value: 0,
            byte_ready_level: false,
            byte_ready_edge: false,
            finish_commits: 0
        }
    }
    /// Swap tables if the clock or zone rates changed.
    pub fn set_key(&mut self,key: TableKey) {
        if key != self.key {
            self.key = key;
            self.tables = rotation_tables(key);
        }
    }
    pub fn set_zone(&mut self,zone: u8) {
        self.zone = zone & 3;
    }
    pub fn zone(&self) -> u8 {
        self.zone
    }
    /// Requested mode, takes effect after `finish_mode` and one byte time.
    pub fn set_mode(&mut self,mode: Mode) {
        self.mode = mode;
    }
    pub fn mode(&self) -> Mode {
        self.mode
    }
    /// mode the electronics are in right now
    pub fn effective_mode(&self) -> Mode {
        self.last_mode
    }
    /// Record a mode switch, committed by a later `rotate`.
    pub fn finish_mode(&mut self) {
        self.finish_pending += 1;
    }
    pub fn finish_pending(&self) -> bool {
        self.finish_pending > 0
    }
    /// count of mode switches that have been committed
    pub fn finish_commits(&self) -> u64 {
        self.finish_commits
    }
    /// Head goes to the start of a new track.
    pub fn set_track(&mut self,track_len: usize) {
        self.head = RingCursor::new(0,track_len);
    }
    pub fn head_offset(&self) -> usize {
        self.head.pos()
    }
    pub fn accum(&self) -> u32 {
        self.accum
    }
    pub fn bits_moved(&self) -> u64 {
        self.bits_moved
    }
    pub fn last_clk(&self) -> u64 {
        self.last_clk
    }
    pub fn read_value(&self) -> u8 {
        self.read_value
    }
    pub fn set_write_value(&mut self,val: u8) {
        self.write_value = val;
    }
    pub fn byte_ready_level(&self) -> bool {
        self.byte_ready_level
    }
    /// Consume the byte ready edge.
    pub fn take_byte_ready_edge(&mut self) -> bool {
        let ans = self.byte_ready_edge;
        self.byte_ready_edge = false;
        ans
    }
    /// Disk is not turning, time passes without moving bits.
    pub fn idle(&mut self,now: u64) {
        self.last_clk = now;
    }
    /// Subtract `sub` from the clock reference.
    pub fn rebase(&mut self,sub: u64) {
        self.last_clk = self.last_clk.saturating_sub(sub);
    }
    /// Sync is seen when reading and the head is on the second of two sync bytes.
    /// A run that starts one bit out of phase counts once at least two bits of the
    /// first sync byte have passed and the next byte continues the run.
    pub fn sync_found(&self,track: &TrackBuffer) -> bool {
        if self.last_mode==Mode::Write {
            return false;
        }
        let buf = track.bytes();
        if self.head.read(buf) != 0xff {
            return false;
        }
        if self.head.prev().read(buf)==0xff {
            return true;
        }
        let mut next = self.head;
        next.advance(1);
        self.bits_moved >= 2 && next.read(buf) & 0xc0 == 0xc0
    }
    /// bits that passed under the head from `last_clk` to `now` in the current zone
    fn new_bits(&mut self,now: u64) -> u64 {
        let table = &self.tables[self.zone as usize];
        let mut delta = now - self.last_clk;
        let mut ans: u64 = 0;
        while delta > 0 {
            let step = u64::min(delta,ROTATION_TABLE_SIZE as u64 - 1);
            let entry = table.get(step as usize);
            ans += entry.bits as u64;
            self.accum += entry.accum;
            delta -= step;
            if self.accum >= ACCUM_MAX {
                self.accum -= ACCUM_MAX;
                ans += 1;
            }
        }
        ans
    }
    /// store `count` copies of the write value starting at the head
    fn write_bytes(&mut self,track: &mut TrackBuffer,count: u64) {
        if count==0 {
            return;
        }
        let len = self.head.len() as u64;
        if count >= len {
            track.bytes_mut().fill(self.write_value);
            self.head.advance((count % len) as usize);
        } else {
            let buf = track.bytes_mut();
            for _ in 0..count {
                self.head.write(buf,self.write_value);
                self.head.advance(1);
            }
        }
        track.set_dirty(true);
    }
    /// Bring the head up to the clock `now`, transferring whole bytes.
    pub fn rotate(&mut self,now: u64,track: &mut TrackBuffer) {
        if now < self.last_clk {
            log::warn!("clock went backwards from {} to {}",self.last_clk,now);
            self.last_clk = now;
            return;
        }
        if self.head.len() != track.len() {
            log::debug!("head resynchronized to track length {}",track.len());
            self.head = RingCursor::new(self.head.pos(),track.len());
        }
        self.bits_moved += self.new_bits(now);
        self.last_clk = now;
        if self.bits_moved < 8 {
            return;
        }
        while self.finish_pending > 0 && self.bits_moved >= 8 {
            match self.last_mode {
                Mode::Write => self.write_bytes(track,1),
                Mode::Read => {
                    self.head.advance(1);
                    self.read_value = self.head.read(track.bytes());
                }
            }
            self.bits_moved -= 8;
            self.finish_pending -= 1;
            self.finish_commits += 1;
            self.last_mode = match self.finish_pending {
                0 => self.mode,
                _ => self.last_mode.toggled()
            };
        }
        if self.finish_pending==0 {
            match self.last_mode {
                Mode::Write => {
                    self.write_bytes(track,self.bits_moved / 8);
                    self.bits_moved %= 8;
                },
                Mode::Read => {
                    self.head.advance((self.bits_moved / 8 % self.head.len() as u64) as usize);
                    self.bits_moved %= 8;
                    self.read_value = self.head.read(track.bytes());
                }
            }
        }
        let sync = self.sync_found(track);
        self.byte_ready_level = !sync;
        if !sync {
            self.byte_ready_edge = true;
        }
    }
    pub fn snapshot(&self) -> RotationSnapshot {
        RotationSnapshot {
            zone: self.zone,
            accum: self.accum,
            bits_moved: self.bits_moved,
            finish_pending: self.finish_pending,
            mode: self.mode,
            last_mode: self.last_mode,
            last_clk: self.last_clk,
            head_offset: self.head.pos(),
            track_len: self.head.len(),
            write_value: self.write_value,
            read_value: self.read_value,
            byte_ready_level: self.byte_ready_level,
            byte_ready_edge: self.byte_ready_edge
        }
    }
    /// Restore scalars, the zone is reapplied against the current tables.
    pub fn restore(&mut self,snap: &RotationSnapshot) {
        self.set_zone(snap.zone);
        self.accum = snap.accum % ACCUM_MAX;
        self.bits_moved = snap.bits_moved;
        self.finish_pending = snap.finish_pending;
        self.mode = snap.mode;
        self.last_mode = snap.last_mode;
        self.last_clk = snap.last_clk;
        self.head = RingCursor::new(snap.head_offset,snap.track_len);
        self.write_value = snap.write_value;
        self.read_value = snap.read_value;
        self.byte_ready_level = snap.byte_ready_level;
        self.byte_ready_edge = snap.byte_ready_edge;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// deterministic pseudo random numbers for split points
    struct Lcg(u64);
    impl Lcg {
        fn next(&mut self,modulus: u64) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (self.0 >> 33) % modulus
        }
    }

    fn test_track() -> TrackBuffer {
        let mut trk = TrackBuffer::new(7142,2);
        for (i,b) in trk.bytes_mut().iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        trk
    }

    fn check_invariants(rot: &RotationState,trk: &TrackBuffer) {
        assert!(rot.accum() < ACCUM_MAX);
        assert!(rot.head_offset() < trk.len());
    }

    #[test]
    fn tables_are_shared() {
        let a = rotation_tables(TableKey::default());
        let b = rotation_tables(TableKey::default());
        assert!(Arc::ptr_eq(&a,&b));
        let c = rotation_tables(TableKey { speeds: ROT_SPEED_BPS, clock_hz: 985248 });
        assert!(!Arc::ptr_eq(&a,&c));
    }

    #[test]
    fn table_is_linear() {
        let tables = build_tables(TableKey::default());
        // zone 0 is exactly a quarter bit per tick
        assert_eq!(tables[0].get(4),RotationEntry { bits: 1, accum: 0 });
        assert_eq!(tables[0].get(ROTATION_TABLE_SIZE-1),RotationEntry { bits: 1023, accum: 0xc000 });
        for z in 0..4 {
            let one = tables[z].get(1);
            let big = tables[z].get(1000);
            assert_eq!(big.bits as u64 * ACCUM_MAX as u64 + big.accum as u64,1000*(one.bits as u64 * ACCUM_MAX as u64 + one.accum as u64));
        }
    }

    #[test]
    fn one_revolution() {
        let mut trk = TrackBuffer::new(6250,0);
        let mut rot = RotationState::new(TableKey::default(),trk.len());
        rot.set_zone(0);
        // 250000 bits per second at 300 rpm is 6250 bytes per revolution
        rot.rotate(200_000,&mut trk);
        assert_eq!(rot.head_offset(),0);
        assert_eq!(rot.bits_moved(),0);
    }

    #[test]
    fn conservation() {
        let mut rng = Lcg(17);
        for mode in [Mode::Read,Mode::Write] {
            for zone in 0..4 {
                let total: u64 = 50_000 + rng.next(200_000);
                let mut trk1 = test_track();
                let mut trk2 = test_track();
                let mut one = RotationState::new(TableKey::default(),trk1.len());
                let mut many = RotationState::new(TableKey::default(),trk2.len());
                for rot in [&mut one,&mut many] {
                    rot.set_zone(zone);
                    rot.set_mode(mode);
                    rot.finish_mode();
                    rot.set_write_value(0x5a);
                }
                one.rotate(total,&mut trk1);
                let mut now = 0;
                while now < total {
                    now = u64::min(total,now + 1 + rng.next(9000));
                    many.rotate(now,&mut trk2);
                    check_invariants(&many,&trk2);
                }
                check_invariants(&one,&trk1);
                assert_eq!(one.snapshot(),many.snapshot());
                assert_eq!(trk1.bytes(),trk2.bytes());
            }
        }
    }

    #[test]
    fn one_commit_per_toggle() {
        let mut rng = Lcg(5);
        let mut trk = test_track();
        let mut rot = RotationState::new(TableKey::default(),trk.len());
        rot.set_zone(3);
        let mut now = 0;
        let mut toggles = 0;
        for _ in 0..500 {
            // some gaps are shorter than a byte time so switches pile up
            now += rng.next(60);
            rot.rotate(now,&mut trk);
            let new_mode = rot.mode().toggled();
            rot.set_mode(new_mode);
            rot.finish_mode();
            toggles += 1;
            check_invariants(&rot,&trk);
            assert!(rot.finish_commits() <= toggles);
        }
        now += 10_000;
        rot.rotate(now,&mut trk);
        assert_eq!(rot.finish_commits(),toggles);
        assert_eq!(rot.effective_mode(),rot.mode());
    }

    #[test]
    fn switch_is_one_byte_late() {
        let mut trk = test_track();
        let mut rot = RotationState::new(TableKey::default(),trk.len());
        rot.set_zone(0);
        rot.rotate(32,&mut trk);
        assert_eq!(rot.head_offset(),1);
        rot.set_mode(Mode::Write);
        rot.finish_mode();
        rot.set_write_value(0xaa);
        // first byte time is still a read
        rot.rotate(64,&mut trk);
        assert_eq!(rot.head_offset(),2);
        assert_eq!(trk.bytes()[2],2);
        assert!(!trk.is_dirty());
        rot.rotate(96,&mut trk);
        assert_eq!(trk.bytes()[2],0xaa);
        assert_eq!(rot.head_offset(),3);
        assert!(trk.is_dirty());
    }

    #[test]
    fn sync_detection() {
        let mut trk = TrackBuffer::new(6250,0);
        trk.bytes_mut()[10..15].fill(0xff);
        let mut rot = RotationState::new(TableKey::default(),trk.len());
        rot.rotate(32*10,&mut trk);
        assert_eq!(rot.head_offset(),10);
        assert!(!rot.sync_found(&trk));
        assert!(rot.take_byte_ready_edge());
        rot.rotate(32*11,&mut trk);
        assert!(rot.sync_found(&trk));
        assert!(!rot.byte_ready_level());
        assert!(!rot.take_byte_ready_edge());
        rot.rotate(32*15,&mut trk);
        assert!(!rot.sync_found(&trk));
        assert!(rot.byte_ready_level());
    }

    #[test]
    fn sync_out_of_phase() {
        let mut trk = TrackBuffer::new(6250,0);
        trk.bytes_mut()[9] = 0x55;
        trk.bytes_mut()[10] = 0xff;
        trk.bytes_mut()[11] = 0xc0;
        let mut rot = RotationState::new(TableKey::default(),trk.len());
        // one bit into the first sync byte
        rot.rotate(32*10 + 4,&mut trk);
        assert_eq!(rot.head_offset(),10);
        assert_eq!(rot.bits_moved(),1);
        assert!(!rot.sync_found(&trk));
        rot.rotate(32*10 + 8,&mut trk);
        assert_eq!(rot.bits_moved(),2);
        assert!(rot.sync_found(&trk));
        assert!(!rot.byte_ready_level());
        // the run has to continue into the next byte
        trk.bytes_mut()[11] = 0x80;
        assert!(!rot.sync_found(&trk));
        // never while writing
        trk.bytes_mut()[11] = 0xc0;
        rot.set_mode(Mode::Write);
        rot.finish_mode();
        rot.rotate(32*11 + 8,&mut trk);
        assert_eq!(rot.effective_mode(),Mode::Write);
        assert!(!rot.sync_found(&trk));
    }
}
