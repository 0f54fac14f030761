//! Drive state for emulator snapshots.
//!
//! This is only the data; framing it into a snapshot file is up to the host.  Byte arrays
//! are stored as hex strings so the JSON stays compact and readable.

use serde::{Serialize,Deserialize};
use crate::img::tracks::{TrackBuffer,NUM_MAX_BYTES_TRACK,HALF_TRACK_SLOTS,MIN_HALF_TRACK,MAX_HALF_TRACK};
use crate::{DYNERR,STDRESULT};
use super::rotation::RotationSnapshot;
use super::{DriveContext,DriveError};

mod hex_bytes {
    use serde::{Deserialize,Deserializer,Serializer};
    pub fn serialize<S: Serializer>(bytes: &Vec<u8>,s: S) -> Result<S::Ok,S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }
    pub fn deserialize<'de,D: Deserializer<'de>>(d: D) -> Result<Vec<u8>,D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone,Debug,PartialEq,Serialize,Deserialize)]
pub struct TrackSnapshot {
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub zones: Vec<u8>,
    pub len: usize,
    pub dirty: bool
}

#[derive(Clone,Debug,PartialEq,Serialize,Deserialize)]
pub struct DriveSnapshot {
    pub unit: usize,
    pub half_track: usize,
    pub led: bool,
    pub motor: bool,
    pub byte_ready_enabled: bool,
    pub last_prb: u8,
    pub last_pcr: u8,
    pub rotation: RotationSnapshot,
    pub tracks: Vec<TrackSnapshot>
}

impl TrackSnapshot {
    fn capture(buf: &TrackBuffer) -> Self {
        Self {
            data: buf.bytes().to_vec(),
            zones: buf.zones().to_vec(),
            len: buf.len(),
            dirty: buf.is_dirty()
        }
    }
    fn to_buffer(&self) -> Result<TrackBuffer,DYNERR> {
        if self.len==0 || self.len > NUM_MAX_BYTES_TRACK || self.data.len() != self.len || self.zones.len() != self.len {
            log::error!("track snapshot with length {} is inconsistent",self.len);
            return Err(Box::new(DriveError::SnapshotMismatch));
        }
        let mut ans = TrackBuffer::new(self.len,0);
        ans.put(0,&self.data)?;
        ans.set_zones(&self.zones);
        ans.set_dirty(self.dirty);
        Ok(ans)
    }
}

impl DriveSnapshot {
    pub fn to_json(&self) -> Result<String,DYNERR> {
        Ok(serde_json::to_string(self)?)
    }
    pub fn from_json(s: &str) -> Result<Self,DYNERR> {
        Ok(serde_json::from_str(s)?)
    }
}

impl DriveContext {
    pub fn snapshot(&self) -> DriveSnapshot {
        DriveSnapshot {
            unit: self.unit,
            half_track: self.half_track,
            led: self.led,
            motor: self.motor,
            byte_ready_enabled: self.byte_ready_enabled,
            last_prb: self.last_prb,
            last_pcr: self.last_pcr,
            rotation: self.rotation.snapshot(),
            tracks: self.tracks.iter().map(TrackSnapshot::capture).collect()
        }
    }
    /// Restore a snapshot taken from this unit.  Nothing changes unless the whole snapshot
    /// is valid.  The attached image is not part of the snapshot.
    pub fn restore(&mut self,snap: &DriveSnapshot) -> STDRESULT {
        if snap.unit != self.unit || snap.tracks.len() != HALF_TRACK_SLOTS {
            log::error!("snapshot of unit {} with {} tracks does not fit unit {}",snap.unit,snap.tracks.len(),self.unit);
            return Err(Box::new(DriveError::SnapshotMismatch));
        }
        let mut tracks = Vec::new();
        for t in &snap.tracks {
            tracks.push(t.to_buffer()?);
        }
        self.tracks = tracks;
        self.half_track = usize::clamp(snap.half_track,MIN_HALF_TRACK,MAX_HALF_TRACK);
        self.led = snap.led;
        self.motor = snap.motor;
        self.byte_ready_enabled = snap.byte_ready_enabled;
        self.last_prb = snap.last_prb;
        self.last_pcr = snap.last_pcr;
        self.rotation.set_key(self.settings.table_key());
        self.rotation.restore(&snap.rotation);
        log::debug!("unit {}: restored at half track {}",self.unit,self.half_track);
        Ok(())
    }
}
