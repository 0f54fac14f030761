//! # Disk Image Module
//!
//! Disk images are represented by the `DiskImage` struct, which couples image attributes
//! with one of two kinds of backing store:
//! * sector backends (`SectorBackend` trait objects, e.g. `d64::D64`), which only know
//!   about 256 byte sectors and a controller status for each one
//! * native bit images (`g64::G64`), which store the raw GCR stream of every track
//!
//! This object is best thought of as the disk itself.  The drive mechanism, including the
//! track buffers and rotation, lives in the `drive` module.
//!
//! ## Controller Status
//!
//! Sector backends report problems using the closed set of error codes the drive controller
//! would produce (`ControllerStatus`).  These are not Rust errors: the track synchronizer
//! shapes the bit stream so that the drive firmware discovers them on its own.
//! Rust errors are reserved for cases where the backend cannot serve a request at all.

pub mod d64;
pub mod g64;
pub mod tracks;

use std::str::FromStr;
use std::fmt;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use crate::{STDRESULT,DYNERR};

/// Enumerates disk image errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("unknown image type")]
    UnknownImageType,
    #[error("image size did not match any known geometry")]
    ImageSizeMismatch,
    #[error("image type not compatible with request")]
    ImageTypeMismatch,
    #[error("bad signature in image header")]
    BadSignature,
    #[error("image is truncated")]
    Truncated,
    #[error("track length {0} is not supported")]
    TrackLength(usize),
    #[error("geometric coordinate out of range")]
    GeometryMismatch,
    #[error("unable to access sector")]
    SectorAccess,
    #[error("unable to access track")]
    TrackAccess,
    #[error("image is write protected")]
    WriteProtected,
    #[error("this operation is not implemented")]
    Unimplemented
}

/// Disk controller status codes.  These are the numbers the drive firmware would
/// report on its error channel.
#[derive(FromPrimitive,PartialEq,Eq,Clone,Copy,Debug)]
pub enum ControllerStatus {
    Ok = 1,
    HeaderNotFound = 20,
    NoSync = 21,
    DataNotFound = 22,
    DataChecksum = 23,
    ByteDecoding = 24,
    WriteVerify = 25,
    WriteProtect = 26,
    HeaderChecksum = 27,
    LongData = 28,
    IdMismatch = 29,
    DriveNotReady = 74
}

impl ControllerStatus {
    /// Translate a byte from a D64 error map.  Unknown values are treated as no error.
    pub fn from_error_map(val: u8) -> Self {
        match val {
            0x02 => Self::HeaderNotFound,
            0x03 => Self::NoSync,
            0x04 => Self::DataNotFound,
            0x05 => Self::DataChecksum,
            0x07 => Self::WriteVerify,
            0x08 => Self::WriteProtect,
            0x09 => Self::HeaderChecksum,
            0x0a => Self::LongData,
            0x0b => Self::IdMismatch,
            0x0f => Self::DriveNotReady,
            0x10 => Self::ByteDecoding,
            _ => Self::Ok
        }
    }
    /// Inverse of `from_error_map`
    pub fn to_error_map(&self) -> u8 {
        match self {
            Self::Ok => 0x01,
            Self::HeaderNotFound => 0x02,
            Self::NoSync => 0x03,
            Self::DataNotFound => 0x04,
            Self::DataChecksum => 0x05,
            Self::WriteVerify => 0x07,
            Self::WriteProtect => 0x08,
            Self::HeaderChecksum => 0x09,
            Self::LongData => 0x0a,
            Self::IdMismatch => 0x0b,
            Self::DriveNotReady => 0x0f,
            Self::ByteDecoding => 0x10
        }
    }
    /// Interpret the controller's decimal code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            c => Self::from_u8(c)
        }
    }
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,"{:02}",*self as u8)
    }
}

#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum DiskImageType {
    D64,
    G64
}

impl FromStr for DiskImageType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s {
            "d64" => Ok(Self::D64),
            "g64" => Ok(Self::G64),
            _ => Err(Error::UnknownImageType)
        }
    }
}

impl fmt::Display for DiskImageType {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::D64 => write!(f,"d64"),
            Self::G64 => write!(f,"g64")
        }
    }
}

/// Contract for images that store 256 byte sectors.
/// An `Err` means the request could not be served at all, e.g. the sector is outside
/// the image.  Disk errors that a real controller would see are returned as a status.
pub trait SectorBackend {
    /// tracks currently allocated in the image
    fn num_tracks(&self) -> usize;
    fn read_sector(&mut self,track: u8,sector: u8) -> Result<(ControllerStatus,[u8;256]),DYNERR>;
    fn write_sector(&mut self,track: u8,sector: u8,dat: &[u8;256]) -> Result<ControllerStatus,DYNERR>;
    /// Grow the image to `tracks` tracks, new sectors are zero
    fn extend(&mut self,tracks: usize) -> STDRESULT;
    /// Serialize the image in its native file format
    fn to_bytes(&self) -> Vec<u8>;
}

/// How the image stores the disk
pub enum Backing {
    Sectors(Box<dyn SectorBackend>),
    Bits(g64::G64)
}

/// A logical disk that can be inserted into a drive.
pub struct DiskImage {
    kind: DiskImageType,
    read_only: bool,
    id: [u8;2],
    backing: Backing
}

impl DiskImage {
    /// Wrap a sector backend, the disk ID is taken from the directory header.
    pub fn from_sectors(kind: DiskImageType,mut backend: Box<dyn SectorBackend>) -> Result<Self,DYNERR> {
        let id = match backend.read_sector(18,0) {
            Ok((_,buf)) => [buf[0xa2],buf[0xa3]],
            Err(e) => {
                log::error!("could not read directory header: {}",e);
                return Err(e);
            }
        };
        log::debug!("disk ID is {}",hex::encode(id));
        Ok(Self {
            kind,
            read_only: false,
            id,
            backing: Backing::Sectors(backend)
        })
    }
    pub fn from_g64(g64: g64::G64) -> Self {
        let id = g64.disk_id().unwrap_or([0,0]);
        Self {
            kind: DiskImageType::G64,
            read_only: false,
            id,
            backing: Backing::Bits(g64)
        }
    }
    pub fn what_am_i(&self) -> DiskImageType {
        self.kind
    }
    pub fn track_count(&self) -> usize {
        match &self.backing {
            Backing::Sectors(b) => b.num_tracks(),
            Backing::Bits(g) => g.track_count()
        }
    }
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
    pub fn set_read_only(&mut self,read_only: bool) {
        self.read_only = read_only;
    }
    /// the two ID characters, in the order `[id1,id2]`
    pub fn disk_id(&self) -> [u8;2] {
        self.id
    }
    pub fn backing(&self) -> &Backing {
        &self.backing
    }
    pub fn backing_mut(&mut self) -> &mut Backing {
        &mut self.backing
    }
    /// Serialize the image, this is how changes are made permanent.
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.backing {
            Backing::Sectors(b) => b.to_bytes(),
            Backing::Bits(g) => g.to_bytes()
        }
    }
    /// JSON description of the image
    pub fn get_metadata(&self,indent: Option<u16>) -> String {
        let mut root = json::JsonValue::new_object();
        let typ = self.kind.to_string();
        root[&typ] = json::JsonValue::new_object();
        root[&typ]["tracks"] = json::JsonValue::from(self.track_count());
        root[&typ]["id"] = json::JsonValue::new_object();
        root[&typ]["id"]["_raw"] = json::JsonValue::String(hex::encode(self.id));
        root[&typ]["id"]["_pretty"] = json::JsonValue::String(String::from_utf8_lossy(&self.id).to_string());
        root[&typ]["read_only"] = json::JsonValue::Boolean(self.read_only);
        if let Backing::Bits(g) = &self.backing {
            root[&typ]["track_table"] = g.track_metadata();
        }
        if let Some(spaces) = indent {
            json::stringify_pretty(root,spaces)
        } else {
            json::stringify(root)
        }
    }
}

#[test]
fn error_map_translation() {
    assert_eq!(ControllerStatus::from_error_map(0),ControllerStatus::Ok);
    assert_eq!(ControllerStatus::from_error_map(1),ControllerStatus::Ok);
    assert_eq!(ControllerStatus::from_error_map(3),ControllerStatus::NoSync);
    assert_eq!(ControllerStatus::from_error_map(0x10),ControllerStatus::ByteDecoding);
    assert_eq!(ControllerStatus::from_error_map(5) as u8,23);
    for code in [20,21,22,23,24,25,26,27,28,29,74] {
        let stat = ControllerStatus::from_code(code).expect("known code");
        assert_eq!(ControllerStatus::from_error_map(stat.to_error_map()),stat);
    }
}
