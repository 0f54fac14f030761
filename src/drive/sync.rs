//! ## Track synchronizer
//!
//! Keeps the drive's track buffers consistent with the attached image.
//!
//! There is one buffer for every half track.  For sector images, attaching encodes every
//! sector into the buffer of its whole track and leaves the half tracks in between
//! unformatted.  Writing back finds every sector in a dirty buffer and decodes it into
//! the backend.  Sectors with a recorded controller error are encoded with matching
//! damage, so the firmware finds the same error the original disk had.
//!
//! For native bit images the buffers are the half tracks themselves, and writing back
//! stores the whole half track.

use log::{trace,debug,info,warn,error};
use crate::img;
use crate::img::{Backing,ControllerStatus,DiskImage,SectorBackend};
use crate::img::tracks::{TrackBuffer,gcr,sectors_per_track,speed_zone,RAW_TRACK_SIZE,
    NUM_BYTES_SECTOR_GCR,EXT_TRACKS,MIN_HALF_TRACK,HALF_TRACK_SLOTS};
use crate::DYNERR;
use super::settings::ExtendPolicy;

/// Called with the track number when the image has to grow, returns true to allow it.
pub type ExtendDecider = Box<dyn FnMut(usize) -> bool>;

pub struct TrackSynchronizer {
    policy: ExtendPolicy,
    /// cleared when the user declines to extend, until the next attach
    ask: bool,
    decider: Option<ExtendDecider>
}

/// Encode all the sectors of a sector image into track buffers, `ans[0]` is half track 2.
/// Half tracks, and tracks beyond the image, are left unformatted.
pub fn tracks_from_sectors(backend: &mut dyn SectorBackend,id: [u8;2]) -> Result<Vec<TrackBuffer>,DYNERR> {
    let [id1,id2] = id;
    let mut ans = Vec::new();
    for slot in 0..HALF_TRACK_SLOTS {
        let half_track = slot + MIN_HALF_TRACK;
        let track = half_track / 2;
        let zone = speed_zone(track);
        let mut buf = TrackBuffer::new(RAW_TRACK_SIZE[zone as usize],zone);
        if half_track % 2 == 0 && track <= backend.num_tracks() {
            buf.fill(0xff);
            for sector in 0..sectors_per_track(track) {
                let (status,data) = match backend.read_sector(track as u8,sector as u8) {
                    Ok(x) => x,
                    Err(e) => {
                        error!("cannot read T:{} S:{} from disk image: {}",track,sector,e);
                        continue;
                    }
                };
                if status==ControllerStatus::NoSync {
                    debug!("track {} has no sync",track);
                    buf.fill(0);
                    break;
                }
                if status != ControllerStatus::Ok {
                    debug!("T:{} S:{} carries error {}",track,sector,status);
                }
                let frame = gcr::encode_sector_with_error(&data,track as u8,sector as u8,id1,id2,status);
                buf.put(sector*NUM_BYTES_SECTOR_GCR,&frame)?;
            }
        }
        ans.push(buf);
    }
    Ok(ans)
}

impl TrackSynchronizer {
    pub fn new(policy: ExtendPolicy) -> Self {
        Self {
            policy,
            ask: true,
            decider: None
        }
    }
    pub fn set_policy(&mut self,policy: ExtendPolicy) {
        self.policy = policy;
    }
    /// Install the callback that answers `Ask` requests, without one the answer is no.
    pub fn set_decider(&mut self,decider: ExtendDecider) {
        self.decider = Some(decider);
    }
    /// Produce the track buffers for a freshly attached image, `ans[0]` is half track 2.
    pub fn attach(&mut self,img: &mut DiskImage) -> Result<Vec<TrackBuffer>,DYNERR> {
        self.ask = true;
        let id = img.disk_id();
        match img.backing_mut() {
            Backing::Sectors(backend) => tracks_from_sectors(backend.as_mut(),id),
            Backing::Bits(g64) => g64.load_tracks()
        }
    }
    /// Decide whether a sector image may grow to hold `track`.
    fn may_extend(&mut self,track: usize) -> bool {
        match self.policy {
            ExtendPolicy::Never => {
                self.ask = true;
                false
            },
            ExtendPolicy::Ask => {
                if !self.ask {
                    return false;
                }
                let yes = match self.decider.as_mut() {
                    Some(f) => f(track),
                    None => false
                };
                if !yes {
                    self.ask = false;
                }
                yes
            },
            ExtendPolicy::Always => {
                self.ask = true;
                true
            }
        }
    }
    /// Store the dirty buffer of a half track into the image.  Returns the number of
    /// sectors written, or 1 for a native track.  A clean buffer is not touched.
    /// Sectors that cannot be found are logged and skipped.
    pub fn write_back(&mut self,img: &mut DiskImage,half_track: usize,buf: &mut TrackBuffer) -> Result<usize,DYNERR> {
        if !buf.is_dirty() {
            return Ok(0);
        }
        if img.is_read_only() {
            warn!("image is read only, changes to half track {} are dropped",half_track);
            buf.set_dirty(false);
            return Err(Box::new(img::Error::WriteProtected));
        }
        let backend = match img.backing_mut() {
            Backing::Bits(g64) => {
                g64.write_track(half_track,buf)?;
                buf.set_dirty(false);
                return Ok(1);
            },
            Backing::Sectors(backend) => backend
        };
        if half_track % 2 != 0 {
            error!("half track {} cannot be stored in a sector image",half_track);
            return Err(Box::new(img::Error::TrackAccess));
        }
        let track = half_track / 2;
        if track > EXT_TRACKS {
            error!("track {} is beyond any sector image",track);
            return Err(Box::new(img::Error::TrackAccess));
        }
        if track > backend.num_tracks() {
            if !self.may_extend(track) {
                warn!("image not extended, write to track {} skipped",track);
                return Ok(0);
            }
            info!("extending image to {} tracks",EXT_TRACKS);
            backend.extend(EXT_TRACKS)?;
        }
        buf.set_dirty(false);
        let mut count = 0;
        let bytes = buf.bytes();
        for sector in 0..sectors_per_track(track) {
            let hdr = match gcr::find_sector_header(bytes,track as u8,sector as u8) {
                Some(curs) => curs,
                None => {
                    error!("could not find header of T:{} S:{}",track,sector);
                    continue;
                }
            };
            let dat = match gcr::find_sector_data(bytes,hdr) {
                Some(curs) => curs,
                None => {
                    error!("could not find data sync of T:{} S:{}",track,sector);
                    continue;
                }
            };
            let decoded = gcr::decode_sector(bytes,dat.pos());
            if decoded.status != gcr::DATA_MARKER {
                error!("could not find data block id of T:{} S:{}",track,sector);
                continue;
            }
            if !decoded.checksum_ok {
                warn!("checksum mismatch in T:{} S:{}",track,sector);
            }
            match backend.write_sector(track as u8,sector as u8,&decoded.data) {
                Ok(ControllerStatus::Ok) => count += 1,
                Ok(status) => error!("could not update T:{} S:{}, status {}",track,sector,status),
                Err(e) => error!("could not update T:{} S:{}: {}",track,sector,e)
            }
        }
        trace!("wrote back {} sectors of track {}",count,track);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::img::d64::D64;
    use crate::img::DiskImageType;
    use crate::img::tracks::track_slot;

    fn fresh_image() -> DiskImage {
        DiskImage::from_sectors(DiskImageType::D64,Box::new(D64::default())).expect("could not wrap image")
    }

    #[test]
    fn attach_layout() {
        let mut img = fresh_image();
        let mut sync = TrackSynchronizer::new(ExtendPolicy::Never);
        let tracks = sync.attach(&mut img).expect("attach failed");
        assert_eq!(tracks.len(),HALF_TRACK_SLOTS);
        assert_eq!(tracks[track_slot(1)].len(),7692);
        assert_eq!(tracks[track_slot(18)].len(),7142);
        assert_eq!(tracks[track_slot(35)].len(),6250);
        // unformatted between tracks and past the image
        assert!(tracks[track_slot(18)+1].bytes().iter().all(|b| *b==0));
        assert!(tracks[track_slot(36)].bytes().iter().all(|b| *b==0));
        let dec = gcr::read_sector(tracks[track_slot(18)].bytes(),18,18).expect("sector missing");
        assert!(dec.is_good());
        assert!(gcr::read_sector(tracks[track_slot(18)].bytes(),18,19).is_none());
    }

    #[test]
    fn error_map_shaping() {
        let mut d64 = D64::default();
        d64.set_error(3,1,ControllerStatus::DataChecksum).expect("bad sector");
        d64.set_error(4,0,ControllerStatus::NoSync).expect("bad sector");
        d64.set_error(5,2,ControllerStatus::DataNotFound).expect("bad sector");
        let mut img = DiskImage::from_sectors(DiskImageType::D64,Box::new(d64)).expect("could not wrap image");
        let mut sync = TrackSynchronizer::new(ExtendPolicy::Never);
        let tracks = sync.attach(&mut img).expect("attach failed");
        assert!(!gcr::read_sector(tracks[track_slot(3)].bytes(),3,1).expect("sector missing").checksum_ok);
        assert!(gcr::read_sector(tracks[track_slot(3)].bytes(),3,0).expect("sector missing").is_good());
        assert!(tracks[track_slot(4)].bytes().iter().all(|b| *b==0));
        assert_eq!(gcr::read_sector(tracks[track_slot(5)].bytes(),5,2).expect("sector missing").status,0xff);
    }

    #[test]
    fn idempotent_write_back() {
        let mut d64 = D64::default();
        let mut sec = [0;256];
        for i in 0..256 {
            sec[i] = i as u8;
        }
        d64.write_sector(7,3,&sec).expect("write failed");
        let mut img = DiskImage::from_sectors(DiskImageType::D64,Box::new(d64)).expect("could not wrap image");
        let before = img.to_bytes();
        let mut sync = TrackSynchronizer::new(ExtendPolicy::Never);
        let mut tracks = sync.attach(&mut img).expect("attach failed");
        let slot = track_slot(7);
        // clean buffer is a no-op
        assert_eq!(sync.write_back(&mut img,14,&mut tracks[slot]).expect("write back failed"),0);
        tracks[slot].set_dirty(true);
        assert_eq!(sync.write_back(&mut img,14,&mut tracks[slot]).expect("write back failed"),21);
        let first = img.to_bytes();
        tracks[slot].set_dirty(true);
        assert_eq!(sync.write_back(&mut img,14,&mut tracks[slot]).expect("write back failed"),21);
        let second = img.to_bytes();
        assert_eq!(first,second);
        assert_eq!(first,before);
        assert!(!tracks[slot].is_dirty());
    }

    #[test]
    fn read_only_drops_changes() {
        let mut img = fresh_image();
        img.set_read_only(true);
        let before = img.to_bytes();
        let mut sync = TrackSynchronizer::new(ExtendPolicy::Always);
        let mut tracks = sync.attach(&mut img).expect("attach failed");
        let slot = track_slot(18);
        tracks[slot].bytes_mut()[0..400].fill(0x55);
        tracks[slot].set_dirty(true);
        match sync.write_back(&mut img,36,&mut tracks[slot]) {
            Err(e) => assert!(matches!(e.downcast_ref::<img::Error>(),Some(img::Error::WriteProtected))),
            Ok(_) => panic!("write back to a read only image succeeded")
        }
        assert!(!tracks[slot].is_dirty());
        assert_eq!(img.to_bytes(),before);
    }

    #[test]
    fn half_track_needs_bit_image() {
        let mut img = fresh_image();
        let before = img.to_bytes();
        let mut sync = TrackSynchronizer::new(ExtendPolicy::Always);
        let mut tracks = sync.attach(&mut img).expect("attach failed");
        let slot = track_slot(18) + 1;
        tracks[slot].fill(0xff);
        tracks[slot].set_dirty(true);
        assert!(sync.write_back(&mut img,37,&mut tracks[slot]).is_err());
        assert!(tracks[slot].is_dirty());
        assert_eq!(img.to_bytes(),before);
    }

    #[test]
    fn extend_policies() {
        let mut img = fresh_image();
        let mut sync = TrackSynchronizer::new(ExtendPolicy::Never);
        let mut tracks = sync.attach(&mut img).expect("attach failed");
        let slot = track_slot(36);
        // format track 36 the way the firmware would
        let mut trk = TrackBuffer::new(RAW_TRACK_SIZE[0],0);
        trk.fill(0xff);
        for s in 0..17 {
            trk.put(s*NUM_BYTES_SECTOR_GCR,&gcr::encode_sector(&[0x11;256],36,s as u8,0,0)).expect("put failed");
        }
        tracks[slot] = trk;
        tracks[slot].set_dirty(true);
        assert_eq!(sync.write_back(&mut img,72,&mut tracks[slot]).expect("write back failed"),0);
        assert_eq!(img.track_count(),35);

        let asked = std::rc::Rc::new(std::cell::Cell::new(0));
        let counter = asked.clone();
        sync.set_policy(ExtendPolicy::Ask);
        sync.set_decider(Box::new(move |_| { counter.set(counter.get()+1); false }));
        sync.write_back(&mut img,72,&mut tracks[slot]).expect("write back failed");
        sync.write_back(&mut img,72,&mut tracks[slot]).expect("write back failed");
        assert_eq!(asked.get(),1);
        assert_eq!(img.track_count(),35);

        sync.set_policy(ExtendPolicy::Always);
        assert_eq!(sync.write_back(&mut img,72,&mut tracks[slot]).expect("write back failed"),17);
        assert_eq!(img.track_count(),40);
        if let Backing::Sectors(b) = img.backing_mut() {
            assert_eq!(b.read_sector(36,16).expect("read failed").1,[0x11;256]);
            assert_eq!(b.read_sector(37,0).expect("read failed").1,[0;256]);
        }
    }
}
