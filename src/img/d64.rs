//! ## Support for D64 disk images
//!
//! D64 images are a sequential dump of the decoded 256 byte sectors, track 1 first.
//! The number of sectors per track follows the speed zones, so sector offsets are
//! computed rather than multiplied out.  An image can optionally carry an error map,
//! one byte per sector appended after the data, recording the controller status that
//! the original disk produced for that sector.
//!
//! Accepted geometries are 35, 40, and 42 tracks, each with or without the error map.

use log::{trace,debug,error};
use crate::img;
use crate::img::{ControllerStatus,SectorBackend};
use crate::img::tracks::{sectors_per_track,sectors_before,MAX_TRACKS,NUM_TRACKS};
use crate::{STDRESULT,DYNERR};

const SECTOR_SIZE: usize = 256;
const GEOMETRIES: [usize;3] = [35,40,42];

pub fn file_extensions() -> Vec<String> {
    vec!["d64".to_string()]
}

/// Wrapper for D64 data.
pub struct D64 {
    tracks: usize,
    data: Vec<u8>,
    errors: Option<Vec<u8>>
}

impl D64 {
    /// Create a zeroed image with the given number of tracks and no error map.
    pub fn create(tracks: usize) -> Result<Self,DYNERR> {
        if !GEOMETRIES.contains(&tracks) {
            error!("D64 cannot have {} tracks",tracks);
            return Err(Box::new(img::Error::GeometryMismatch));
        }
        Ok(Self {
            tracks,
            data: vec![0;sectors_before(tracks+1)*SECTOR_SIZE],
            errors: None
        })
    }
    /// Interpret a byte stream as a D64, the size has to match one of the known geometries.
    pub fn from_bytes(data: &[u8]) -> Result<Self,DYNERR> {
        for tracks in GEOMETRIES {
            let sectors = sectors_before(tracks+1);
            if data.len()==sectors*SECTOR_SIZE {
                debug!("D64 with {} tracks",tracks);
                return Ok(Self { tracks, data: data.to_vec(), errors: None });
            }
            if data.len()==sectors*(SECTOR_SIZE+1) {
                debug!("D64 with {} tracks and error map",tracks);
                return Ok(Self {
                    tracks,
                    data: data[0..sectors*SECTOR_SIZE].to_vec(),
                    errors: Some(data[sectors*SECTOR_SIZE..].to_vec())
                });
            }
        }
        debug!("{} bytes does not match any D64 geometry",data.len());
        Err(Box::new(img::Error::ImageSizeMismatch))
    }
    /// Index of the sector in the flat image, or error if it is out of range.
    fn sector_index(&self,track: u8,sector: u8) -> Result<usize,DYNERR> {
        let (t,s) = (track as usize,sector as usize);
        if t < 1 || t > self.tracks || s >= sectors_per_track(t) {
            error!("exceeded bounds: track {} sector {} (image has {} tracks)",t,s,self.tracks);
            return Err(Box::new(img::Error::SectorAccess));
        }
        Ok(sectors_before(t) + s)
    }
    pub fn has_error_map(&self) -> bool {
        self.errors.is_some()
    }
    /// Set the recorded status of a sector, creating the error map if necessary.
    pub fn set_error(&mut self,track: u8,sector: u8,status: ControllerStatus) -> STDRESULT {
        let idx = self.sector_index(track,sector)?;
        let count = sectors_before(self.tracks+1);
        let map = self.errors.get_or_insert_with(|| vec![0x01;count]);
        map[idx] = status.to_error_map();
        Ok(())
    }
}

impl SectorBackend for D64 {
    fn num_tracks(&self) -> usize {
        self.tracks
    }
    fn read_sector(&mut self,track: u8,sector: u8) -> Result<(ControllerStatus,[u8;256]),DYNERR> {
        let idx = self.sector_index(track,sector)?;
        let mut buf = [0;SECTOR_SIZE];
        buf.copy_from_slice(&self.data[idx*SECTOR_SIZE..(idx+1)*SECTOR_SIZE]);
        let status = match &self.errors {
            Some(map) => ControllerStatus::from_error_map(map[idx]),
            None => ControllerStatus::Ok
        };
        trace!("read T{} S{} status {}",track,sector,status);
        Ok((status,buf))
    }
    fn write_sector(&mut self,track: u8,sector: u8,dat: &[u8;256]) -> Result<ControllerStatus,DYNERR> {
        let idx = self.sector_index(track,sector)?;
        self.data[idx*SECTOR_SIZE..(idx+1)*SECTOR_SIZE].copy_from_slice(dat);
        trace!("write T{} S{}",track,sector);
        Ok(ControllerStatus::Ok)
    }
    fn extend(&mut self,tracks: usize) -> STDRESULT {
        if tracks <= self.tracks {
            return Ok(());
        }
        if tracks > MAX_TRACKS || !GEOMETRIES.contains(&tracks) {
            error!("cannot extend D64 to {} tracks",tracks);
            return Err(Box::new(img::Error::GeometryMismatch));
        }
        let sectors = sectors_before(tracks+1);
        self.data.resize(sectors*SECTOR_SIZE,0);
        if let Some(map) = self.errors.as_mut() {
            map.resize(sectors,0x01);
        }
        debug!("D64 extended from {} to {} tracks",self.tracks,tracks);
        self.tracks = tracks;
        Ok(())
    }
    fn to_bytes(&self) -> Vec<u8> {
        let mut ans = self.data.clone();
        if let Some(map) = &self.errors {
            ans.extend_from_slice(map);
        }
        ans
    }
}

impl Default for D64 {
    fn default() -> Self {
        Self {
            tracks: NUM_TRACKS,
            data: vec![0;sectors_before(NUM_TRACKS+1)*SECTOR_SIZE],
            errors: None
        }
    }
}

#[test]
fn sizes() {
    assert_eq!(D64::default().to_bytes().len(),174848);
    assert!(D64::from_bytes(&vec![0;175531]).expect("35 track with errors").has_error_map());
    assert_eq!(D64::from_bytes(&vec![0;196608]).expect("40 track").num_tracks(),40);
    assert_eq!(D64::from_bytes(&vec![0;205312]).expect("42 track").num_tracks(),42);
    assert!(D64::from_bytes(&vec![0;1000]).is_err());
}

#[test]
fn error_map_status() {
    let mut img = vec![0;175531];
    // track 1 sector 3 gets a checksum error
    img[174848+3] = 0x05;
    let mut d64 = D64::from_bytes(&img).expect("bad size");
    assert_eq!(d64.read_sector(1,3).expect("read failed").0,ControllerStatus::DataChecksum);
    assert_eq!(d64.read_sector(1,4).expect("read failed").0,ControllerStatus::Ok);
    assert_eq!(d64.to_bytes().len(),175531);
}

#[test]
fn extend_image() {
    let mut d64 = D64::default();
    assert!(d64.read_sector(36,0).is_err());
    d64.extend(40).expect("extend failed");
    assert_eq!(d64.to_bytes().len(),196608);
    assert_eq!(d64.read_sector(40,16).expect("read failed").1,[0;256]);
    assert!(d64.read_sector(40,17).is_err());
}
