//! # Drive Module
//!
//! The drive mechanism seen from the disk controller: track buffers, the head, the motor,
//! and the rotation that carries bits past the head.  The host emulator owns the CPU and
//! the VIA chip, and calls into a `DriveContext` whenever the firmware touches one of the
//! disk controller registers.
//!
//! Port latches belong to the host, so they are passed in with every register access as a
//! `PortLatches` object rather than stored here.
//!
//! There is one `DriveContext` per unit, gathered in a `DriveSet`.  Nothing is shared
//! between units except the rotation tables, which are immutable.

pub mod rotation;
pub mod settings;
pub mod snapshot;
pub mod sync;

use log::{trace,debug,info,error};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use crate::img::DiskImage;
use crate::img::tracks::{TrackBuffer,speed_zone,track_slot,RAW_TRACK_SIZE,MAX_TRACKS,
    MIN_HALF_TRACK,MAX_HALF_TRACK,HALF_TRACK_SLOTS};
use crate::DYNERR;
use rotation::{Mode,RotationState};
use settings::Settings;
use sync::{TrackSynchronizer,ExtendDecider};

/// half track the head rests on at power up (track 18)
pub const HOME_HALF_TRACK: usize = 36;

const PRB_STEPPER: u8 = 0x03;
const PRB_MOTOR: u8 = 0x04;
const PRB_LED: u8 = 0x08;
const PRB_WRITE_PROTECT: u8 = 0x10;
const PRB_ZONE: u8 = 0x60;
const PRB_SYNC: u8 = 0x80;
const PCR_BYTE_READY: u8 = 0x02;
const PCR_READ_MODE: u8 = 0x20;

#[derive(thiserror::Error,Debug)]
pub enum DriveError {
    #[error("drive unit does not exist")]
    NoSuchUnit,
    #[error("snapshot does not fit the drive")]
    SnapshotMismatch
}

/// Disk controller registers of the drive's second VIA, by address offset.
#[derive(FromPrimitive,PartialEq,Eq,Clone,Copy,Debug)]
pub enum ViaRegister {
    Prb = 0,
    Pra = 1,
    Ddrb = 2,
    Ddra = 3,
    Pcr = 12,
    PraNhs = 15
}

/// Read access to the VIA latches owned by the host.
pub trait PortLatches {
    fn port_a(&self) -> u8;
    fn ddr_a(&self) -> u8;
    fn port_b(&self) -> u8;
    fn ddr_b(&self) -> u8;
    fn pcr(&self) -> u8;
}

/// Plain latch values, for hosts that keep them in a struct anyway.
#[derive(Clone,Copy,Default,Debug,PartialEq,Eq)]
pub struct PortState {
    pub pra: u8,
    pub ddra: u8,
    pub prb: u8,
    pub ddrb: u8,
    pub pcr: u8
}

impl PortLatches for PortState {
    fn port_a(&self) -> u8 { self.pra }
    fn ddr_a(&self) -> u8 { self.ddra }
    fn port_b(&self) -> u8 { self.prb }
    fn ddr_b(&self) -> u8 { self.ddrb }
    fn pcr(&self) -> u8 { self.pcr }
}

/// Half tracks of a drive with no disk in it
fn empty_tracks() -> Vec<TrackBuffer> {
    (0..HALF_TRACK_SLOTS).map(|slot| {
        let zone = speed_zone((slot + MIN_HALF_TRACK) / 2);
        TrackBuffer::new(RAW_TRACK_SIZE[zone as usize],zone)
    }).collect()
}

/// PCR as the drive electronics see it.  CA2 and CB2 lines that are not driven low
/// float high.
fn effective_pcr(raw: u8) -> u8 {
    let mut ans = raw;
    if ans & 0x0c != 0x0c {
        ans |= 0x02;
    }
    if ans & 0xc0 != 0xc0 {
        ans |= 0x20;
    }
    ans
}

pub struct DriveContext {
    unit: usize,
    settings: Settings,
    tracks: Vec<TrackBuffer>,
    rotation: RotationState,
    image: Option<DiskImage>,
    sync: TrackSynchronizer,
    half_track: usize,
    last_prb: u8,
    last_pcr: u8,
    led: bool,
    motor: bool,
    byte_ready_enabled: bool,
    attach_clk: Option<u64>,
    detach_clk: Option<u64>,
    /// a new disk flips the write protect sense once
    new_disk: bool
}

impl DriveContext {
    pub fn new(unit: usize,settings: Settings) -> Self {
        let tracks = empty_tracks();
        let home = &tracks[HOME_HALF_TRACK - MIN_HALF_TRACK];
        let mut rotation = RotationState::new(settings.table_key(),home.len());
        rotation.set_zone(home.zone());
        Self {
            unit,
            sync: TrackSynchronizer::new(settings.extend_policy),
            settings,
            tracks,
            rotation,
            image: None,
            half_track: HOME_HALF_TRACK,
            last_prb: 0,
            last_pcr: effective_pcr(0),
            led: false,
            motor: false,
            byte_ready_enabled: true,
            attach_clk: None,
            detach_clk: None,
            new_disk: false
        }
    }
    pub fn unit(&self) -> usize {
        self.unit
    }
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
    /// Apply new settings.  The rotation tables are swapped if the clock changed.
    pub fn apply_settings(&mut self,settings: Settings) {
        self.rotation.set_key(settings.table_key());
        self.sync.set_policy(settings.extend_policy);
        self.settings = settings;
    }
    /// Callback consulted when the extend policy is `Ask`
    pub fn set_extend_decider(&mut self,decider: ExtendDecider) {
        self.sync.set_decider(decider);
    }
    pub fn is_attached(&self) -> bool {
        self.image.is_some()
    }
    pub fn image(&self) -> Option<&DiskImage> {
        self.image.as_ref()
    }
    pub fn half_track(&self) -> usize {
        self.half_track
    }
    /// full track under the head, 1 based, a half track rounds down
    pub fn track(&self) -> usize {
        self.half_track / 2
    }
    /// index of the buffer under the head
    fn slot(&self) -> usize {
        self.half_track - MIN_HALF_TRACK
    }
    /// buffer of a whole track, 1 based
    pub fn track_buffer(&self,track: usize) -> Option<&TrackBuffer> {
        match track {
            1..=MAX_TRACKS => Some(&self.tracks[track_slot(track)]),
            _ => None
        }
    }
    pub fn half_track_buffer(&self,half_track: usize) -> Option<&TrackBuffer> {
        match half_track {
            h if h >= MIN_HALF_TRACK => self.tracks.get(h - MIN_HALF_TRACK),
            _ => None
        }
    }
    pub fn head_offset(&self) -> usize {
        self.rotation.head_offset()
    }
    pub fn rotation(&self) -> &RotationState {
        &self.rotation
    }
    pub fn led(&self) -> bool {
        self.led
    }
    pub fn motor(&self) -> bool {
        self.motor
    }
    /// Insert a disk at clock `now`.  A disk already in the drive is detached and handed
    /// back so the caller can save it.  If the new image cannot be laid out on tracks,
    /// nothing changes and the old disk stays in the drive.
    pub fn attach(&mut self,mut img: DiskImage,now: u64) -> Result<Option<DiskImage>,DYNERR> {
        let tracks = match self.sync.attach(&mut img) {
            Ok(t) => t,
            Err(e) => {
                error!("unit {}: could not attach {} image: {}",self.unit,img.what_am_i(),e);
                return Err(e);
            }
        };
        let old = self.detach(now);
        self.rotate(now);
        self.tracks = tracks;
        self.image = Some(img);
        self.attach_clk = Some(now);
        self.new_disk = true;
        let idx = self.slot();
        self.rotation.set_track(self.tracks[idx].len());
        info!("unit {}: disk attached",self.unit);
        Ok(old)
    }
    /// Remove the disk at clock `now`, after writing back every dirty track.
    /// The image is handed back so the caller can save it.
    pub fn detach(&mut self,now: u64) -> Option<DiskImage> {
        self.rotate(now);
        self.flush();
        let ans = self.image.take();
        if ans.is_some() {
            info!("unit {}: disk detached",self.unit);
            self.tracks = empty_tracks();
            let idx = self.slot();
            self.rotation.set_track(self.tracks[idx].len());
            self.detach_clk = Some(now);
            self.attach_clk = None;
        }
        ans
    }
    /// Write back one half track if it is dirty, problems are logged.
    fn write_back(&mut self,half_track: usize) {
        if let Some(img) = self.image.as_mut() {
            let buf = &mut self.tracks[half_track - MIN_HALF_TRACK];
            if let Err(e) = self.sync.write_back(img,half_track,buf) {
                error!("unit {}: write back of half track {} failed: {}",self.unit,half_track,e);
            }
        }
    }
    /// Write back every dirty track, the image is then up to date.
    pub fn flush(&mut self) {
        for slot in 0..HALF_TRACK_SLOTS {
            self.write_back(slot + MIN_HALF_TRACK);
        }
    }
    /// Move the head to a half track, clamped to the stepper's range.
    /// The track being left is written back first.  The head starts over at offset 0.
    pub fn set_half_track(&mut self,half_track: usize) {
        let half_track = usize::clamp(half_track,MIN_HALF_TRACK,MAX_HALF_TRACK);
        self.write_back(self.half_track);
        self.half_track = half_track;
        let idx = self.slot();
        self.rotation.set_track(self.tracks[idx].len());
        trace!("unit {}: head on half track {}",self.unit,half_track);
    }
    /// Step the head by `delta` half tracks
    pub fn move_head(&mut self,delta: isize) {
        let target = self.half_track as isize + delta;
        self.set_half_track(usize::try_from(target).unwrap_or(0));
    }
    /// Bring the disk up to clock `now`.  Nothing moves unless the motor is on and the
    /// byte ready line is enabled.
    pub fn rotate(&mut self,now: u64) {
        if self.motor && self.byte_ready_enabled {
            let idx = self.slot();
            self.rotation.rotate(now,&mut self.tracks[idx]);
        } else {
            self.rotation.idle(now);
        }
    }
    /// Subtract `sub` from every stored clock, called when the host rebases its clock.
    pub fn rebase(&mut self,now: u64,sub: u64) {
        self.rotate(now);
        self.rotation.rebase(sub);
        self.attach_clk = self.attach_clk.map(|c| c.saturating_sub(sub));
        self.detach_clk = self.detach_clk.map(|c| c.saturating_sub(sub));
    }
    /// Level of the byte ready line
    pub fn byte_ready(&mut self,now: u64) -> bool {
        self.rotate(now);
        self.byte_ready_enabled && self.rotation.byte_ready_level()
    }
    /// True once for each byte transferred since the last call, this drives the CPU's
    /// overflow flag.
    pub fn take_byte_ready_edge(&mut self,now: u64) -> bool {
        self.rotate(now);
        self.rotation.take_byte_ready_edge() && self.byte_ready_enabled
    }
    /// Write protect sensor, true means protected.  The sensor reads clear while a disk
    /// goes in or comes out.
    pub fn write_protect_sense(&mut self,now: u64) -> bool {
        if let Some(clk) = self.detach_clk {
            if now.saturating_sub(clk) < self.settings.detach_delay {
                return false;
            }
            self.detach_clk = None;
        }
        if let Some(clk) = self.attach_clk {
            if now.saturating_sub(clk) < self.settings.attach_delay {
                return false;
            }
        }
        match &self.image {
            None => true,
            Some(img) => {
                if self.new_disk {
                    self.new_disk = false;
                    !img.is_read_only()
                } else {
                    img.is_read_only()
                }
            }
        }
    }
    fn store_prb(&mut self,now: u64,new: u8) {
        let old = self.last_prb;
        if (old ^ new) & PRB_STEPPER != 0 && new & PRB_MOTOR != 0 {
            let (o,n) = (old & 3,new & 3);
            if o == (n + 1) & 3 {
                self.move_head(-1);
            } else if o == (n + 3) & 3 {
                self.move_head(1);
            }
        }
        if (old ^ new) & (PRB_ZONE | PRB_MOTOR) != 0 {
            self.rotate(now);
            self.rotation.set_zone((new & PRB_ZONE) >> 5);
            self.motor = new & PRB_MOTOR != 0;
            debug!("unit {}: zone {} motor {}",self.unit,self.rotation.zone(),self.motor);
        }
        self.led = new & PRB_LED != 0;
        self.last_prb = new;
    }
    fn store_pcr(&mut self,now: u64,raw: u8) {
        let new = effective_pcr(raw);
        let old = self.last_pcr;
        self.rotate(now);
        self.byte_ready_enabled = new & PCR_BYTE_READY != 0;
        if (old ^ new) & PCR_READ_MODE != 0 {
            self.rotation.set_mode(match new & PCR_READ_MODE {
                0 => Mode::Write,
                _ => Mode::Read
            });
            self.rotation.finish_mode();
        }
        self.last_pcr = new;
    }
    /// Firmware wrote a disk controller register at address offset `addr`.
    pub fn store(&mut self,now: u64,addr: u16,ports: &dyn PortLatches) {
        match ViaRegister::from_u16(addr & 0x0f) {
            Some(ViaRegister::Pra) | Some(ViaRegister::PraNhs) | Some(ViaRegister::Ddra) => {
                self.rotate(now);
                self.rotation.set_write_value(ports.port_a() | !ports.ddr_a());
            },
            Some(ViaRegister::Prb) | Some(ViaRegister::Ddrb) => {
                self.store_prb(now,ports.port_b() | !ports.ddr_b());
            },
            Some(ViaRegister::Pcr) => self.store_pcr(now,ports.pcr()),
            None => {}
        }
    }
    /// Firmware read a disk controller register at address offset `addr`.
    /// Output bits come from the latches, input bits from the drive.
    pub fn read(&mut self,now: u64,addr: u16,ports: &dyn PortLatches) -> u8 {
        match ViaRegister::from_u16(addr & 0x0f) {
            Some(ViaRegister::Pra) | Some(ViaRegister::PraNhs) => {
                let mut byte = 0;
                let settling = match self.attach_clk {
                    Some(clk) if now.saturating_sub(clk) < self.settings.attach_delay => true,
                    Some(_) => {
                        self.attach_clk = None;
                        false
                    },
                    None => false
                };
                if !settling {
                    self.rotate(now);
                    byte = self.rotation.read_value();
                }
                (byte & !ports.ddr_a()) | (ports.port_a() & ports.ddr_a())
            },
            Some(ViaRegister::Prb) => {
                self.rotate(now);
                let idx = self.slot();
                let mut byte = PRB_SYNC | PRB_WRITE_PROTECT;
                if self.rotation.sync_found(&self.tracks[idx]) {
                    byte &= !PRB_SYNC;
                }
                if self.write_protect_sense(now) {
                    byte &= !PRB_WRITE_PROTECT;
                }
                (byte & !ports.ddr_b()) | (ports.port_b() & ports.ddr_b())
            },
            Some(ViaRegister::Ddra) => ports.ddr_a(),
            Some(ViaRegister::Ddrb) => ports.ddr_b(),
            Some(ViaRegister::Pcr) => ports.pcr(),
            None => 0
        }
    }
}

/// All the drive units of the host, indexed by unit number.
pub struct DriveSet {
    drives: Vec<DriveContext>
}

impl DriveSet {
    pub fn new(units: usize,settings: &Settings) -> Self {
        Self {
            drives: (0..units).map(|u| DriveContext::new(u,settings.clone())).collect()
        }
    }
    pub fn len(&self) -> usize {
        self.drives.len()
    }
    pub fn unit(&mut self,unit: usize) -> Result<&mut DriveContext,DYNERR> {
        match self.drives.get_mut(unit) {
            Some(d) => Ok(d),
            None => Err(Box::new(DriveError::NoSuchUnit))
        }
    }
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_,DriveContext> {
        self.drives.iter_mut()
    }
    /// Rebase the clocks of every unit
    pub fn rebase(&mut self,now: u64,sub: u64) {
        for d in self.drives.iter_mut() {
            d.rebase(now,sub);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::img::d64::D64;
    use crate::img::{Backing,DiskImageType,SectorBackend};
    use crate::img::tracks::gcr;

    fn ports(prb: u8) -> PortState {
        PortState { pra: 0, ddra: 0, prb, ddrb: 0xff, pcr: 0xee }
    }

    fn attached_image() -> DiskImage {
        DiskImage::from_sectors(DiskImageType::D64,Box::new(D64::default())).expect("could not wrap image")
    }

    fn attached_drive() -> DriveContext {
        let mut drive = DriveContext::new(8,Settings::default());
        drive.attach(attached_image(),0).expect("attach failed");
        drive
    }

    #[test]
    fn stepper_decoding() {
        let mut drive = DriveContext::new(8,Settings::default());
        // stepping with the motor off does nothing
        drive.store(0,0,&ports(0x01));
        assert_eq!(drive.half_track(),HOME_HALF_TRACK);
        drive.store(0,0,&ports(0x05));
        assert_eq!(drive.half_track(),HOME_HALF_TRACK);
        for (i,phase) in [2u8,3,0,1].into_iter().enumerate() {
            drive.store(0,0,&ports(0x04 | phase));
            assert_eq!(drive.half_track(),HOME_HALF_TRACK + i + 1);
        }
        for phase in [0u8,3,2] {
            drive.store(0,0,&ports(0x04 | phase));
        }
        assert_eq!(drive.half_track(),HOME_HALF_TRACK + 1);
        // jumping two phases is ambiguous and ignored
        drive.store(0,0,&ports(0x04));
        assert_eq!(drive.half_track(),HOME_HALF_TRACK + 1);
    }

    #[test]
    fn head_is_clamped() {
        let mut drive = DriveContext::new(8,Settings::default());
        drive.set_half_track(0);
        assert_eq!(drive.half_track(),MIN_HALF_TRACK);
        assert_eq!(drive.track(),1);
        drive.move_head(200);
        assert_eq!(drive.half_track(),MAX_HALF_TRACK);
        assert_eq!(drive.track(),42);
        assert_eq!(drive.head_offset(),0);
    }

    #[test]
    fn zone_led_motor() {
        let mut drive = DriveContext::new(8,Settings::default());
        drive.store(0,0,&ports(0x04 | 0x08 | 0x40));
        assert!(drive.motor());
        assert!(drive.led());
        assert_eq!(drive.rotation().zone(),2);
        drive.store(10,0,&ports(0x00));
        assert!(!drive.motor());
        assert!(!drive.led());
        assert_eq!(drive.rotation().zone(),0);
    }

    #[test]
    fn rotation_needs_motor() {
        let mut drive = attached_drive();
        // zone 0 moves one byte every 32 cycles
        let p = ports(0x00);
        drive.read(10_000,0,&p);
        assert_eq!(drive.head_offset(),0);
        let p = ports(0x04);
        drive.store(10_000,0,&p);
        drive.read(10_000 + 32*100,0,&p);
        assert_eq!(drive.head_offset(),100);
    }

    #[test]
    fn pcr_mode_switch() {
        let mut drive = attached_drive();
        let mut p = ports(0x04);
        drive.store(0,0,&p);
        p.pcr = 0xce;
        drive.store(0,12,&p);
        assert_eq!(drive.rotation().mode(),Mode::Write);
        assert_eq!(drive.rotation().effective_mode(),Mode::Read);
        drive.rotate(32*2);
        assert_eq!(drive.rotation().effective_mode(),Mode::Write);
        assert_eq!(drive.head_offset(),2);
        // disabling byte ready stops the disk
        p.pcr = 0xcc;
        drive.store(32*2,12,&p);
        drive.rotate(32*100);
        assert_eq!(drive.head_offset(),2);
    }

    #[test]
    fn attach_delay_and_write_protect() {
        let mut drive = DriveContext::new(8,Settings::default());
        let p = PortState { pra: 0, ddra: 0, prb: 0x44, ddrb: 0x6f, pcr: 0xee };
        // no disk reads as protected
        assert_eq!(drive.read(0,0,&p) & PRB_WRITE_PROTECT,0);
        let img = DiskImage::from_sectors(DiskImageType::D64,Box::new(D64::default())).expect("could not wrap image");
        drive.attach(img,1000).expect("attach failed");
        drive.store(1000,0,&p);
        assert_eq!(drive.read(2000,1,&p),0);
        // the sensor reads clear while the disk goes in
        assert!(!drive.write_protect_sense(2000));
        assert_ne!(drive.read(2000,0,&p) & PRB_WRITE_PROTECT,0);
        let later = 1000 + drive.settings().attach_delay;
        // a writable disk flips the sensor once
        assert!(drive.write_protect_sense(later));
        assert!(!drive.write_protect_sense(later+1));
        drive.detach(later+2);
        assert!(!drive.write_protect_sense(later+3));
        assert!(drive.write_protect_sense(later+3+drive.settings().detach_delay));
    }

    #[test]
    fn attach_hands_back_previous_disk() {
        let mut drive = DriveContext::new(8,Settings::default());
        assert!(drive.attach(attached_image(),0).expect("attach failed").is_none());
        drive.set_half_track(2);
        drive.tracks[0].put(0,&gcr::encode_sector(&[0x33;256],1,0,0,0)).expect("put failed");
        drive.tracks[0].set_dirty(true);
        let mut other = D64::default();
        other.write_sector(18,0,&[0x41;256]).expect("write failed");
        let img = DiskImage::from_sectors(DiskImageType::D64,Box::new(other)).expect("could not wrap image");
        let mut old = drive.attach(img,1000).expect("attach failed").expect("no previous disk");
        // the old disk took the write back with it
        match old.backing_mut() {
            Backing::Sectors(b) => assert_eq!(b.read_sector(1,0).expect("read failed").1,[0x33;256]),
            _ => panic!("backing changed")
        }
        assert_eq!(drive.image().expect("no disk").disk_id(),[0x41,0x41]);
        assert!(!drive.tracks[0].is_dirty());
        assert_eq!(gcr::read_sector(drive.tracks[0].bytes(),1,0).expect("sector missing").data,[0;256]);
    }

    #[test]
    fn half_track_buffers() {
        let mut drive = attached_drive();
        drive.set_half_track(37);
        assert_eq!(drive.track(),18);
        assert!(drive.half_track_buffer(37).expect("no buffer").bytes().iter().all(|b| *b==0));
        assert_eq!(drive.half_track_buffer(36).expect("no buffer").bytes()[0],0xff);
        assert!(std::ptr::eq(drive.half_track_buffer(36).expect("no buffer"),drive.track_buffer(18).expect("no buffer")));
        assert!(drive.half_track_buffer(1).is_none());
        assert!(drive.half_track_buffer(86).is_none());
        // the head sees the half track, which has no sync
        let p = ports(0x04);
        drive.store(0,0,&p);
        assert_ne!(drive.read(32*100,0,&p) & PRB_SYNC,0);
    }

    #[test]
    fn rebase_clocks() {
        let mut drive = attached_drive();
        let p = ports(0x04);
        drive.store(1000,0,&p);
        drive.rebase(50_000,40_000);
        assert_eq!(drive.rotation().last_clk(),10_000);
        assert_eq!(drive.attach_clk,Some(0));
        let head = drive.head_offset();
        drive.rotate(10_000 + 32*10);
        assert_eq!(drive.head_offset(),head + 10);
    }

    #[test]
    fn drive_set_units() {
        let mut set = DriveSet::new(2,&Settings::default());
        assert_eq!(set.len(),2);
        assert_eq!(set.unit(1).expect("no unit").unit(),1);
        assert!(set.unit(2).is_err());
    }
}
