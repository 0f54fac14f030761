//! ## Support for G64 disk images
//!
//! G64 stores the raw GCR stream of each half track, so it can represent disks that do
//! not follow the standard sector layout (copy protection, custom loaders).
//!
//! Layout of the file:
//! * 12 byte header: `GCR-1541`, version, half track count, maximum track size (LE)
//! * one `u32` LE file offset per half track, 0 means the track is absent
//! * one `u32` LE speed descriptor per half track, values 0-3 are a zone for the whole
//!   track, anything larger is the offset of a packed zone map
//! * track records: `u16` LE length followed by the track bytes
//!
//! A packed zone map holds 4 zones per byte, first track byte in the two high bits.
//! Table entry `i` is half track `i+2`, so whole track `t` is entry `(t-1)*2`.
//!
//! The image is kept in memory as a byte stream, written tracks patch that stream in
//! place, and `to_bytes` gives back the file.

use binrw::{BinRead,BinWrite};
use binrw::io::Cursor;
use log::{trace,debug,warn,error};
use crate::img;
use crate::img::tracks::{TrackBuffer,gcr,NUM_MAX_BYTES_TRACK,MIN_TRACK_BYTES,MAX_TRACKS,
    MIN_HALF_TRACK,HALF_TRACK_SLOTS};
use crate::{STDRESULT,DYNERR};

const HEADER_LEN: usize = 12;
/// length of tracks that are absent from the image
const DEFAULT_TRACK_LEN: usize = 6250;

pub fn file_extensions() -> Vec<String> {
    vec!["g64".to_string()]
}

#[derive(BinRead,BinWrite,Debug,Clone)]
#[brw(little, magic = b"GCR-1541")]
pub struct Header {
    pub version: u8,
    pub half_tracks: u8,
    pub max_track_size: u16
}

/// Wrapper for G64 data.
pub struct G64 {
    header: Header,
    file: Vec<u8>,
    /// bytes available to each packed zone map, by table entry
    map_room: Vec<usize>
}

/// pack zones 4 per byte, MSB first
fn pack_zones(zones: &[u8]) -> Vec<u8> {
    let mut ans = vec![0;(zones.len()+3)/4];
    for i in 0..zones.len() {
        ans[i/4] |= (zones[i] & 3) << (6 - 2*(i%4));
    }
    ans
}

/// unpack `count` zones from the packed map
fn unpack_zones(packed: &[u8],count: usize) -> Vec<u8> {
    let mut ans = vec![0;count];
    for i in 0..count {
        ans[i] = (packed[i/4] >> (6 - 2*(i%4))) & 3;
    }
    ans
}

/// half track as it is usually written, e.g. `18` or `18.5`
fn half_track_label(half_track: usize) -> String {
    match half_track % 2 {
        0 => (half_track/2).to_string(),
        _ => format!("{}.5",half_track/2)
    }
}

impl G64 {
    /// Create an image holding the given whole tracks, `tracks[0]` is track 1.
    /// Every track gets a full size slot so it can be rewritten in place.
    /// Half tracks in between are absent.
    pub fn create(tracks: &[TrackBuffer]) -> Result<Self,DYNERR> {
        if tracks.len() > MAX_TRACKS {
            error!("G64 cannot hold {} tracks",tracks.len());
            return Err(Box::new(img::Error::GeometryMismatch));
        }
        let header = Header {
            version: 0,
            half_tracks: HALF_TRACK_SLOTS as u8,
            max_track_size: NUM_MAX_BYTES_TRACK as u16
        };
        let mut curs = Cursor::new(Vec::new());
        header.write(&mut curs)?;
        let mut file = curs.into_inner();
        file.resize(HEADER_LEN + 8*HALF_TRACK_SLOTS,0);
        let mut ans = Self { header, file, map_room: vec![0;HALF_TRACK_SLOTS] };
        for (i,trk) in tracks.iter().enumerate() {
            let idx = 2*i;
            if !trk.uniform_zone() {
                // room for the longest track so the map never has to move
                let map_offset = ans.file.len();
                let room = (NUM_MAX_BYTES_TRACK+3)/4;
                ans.file.resize(map_offset + room,0);
                let table = ans.speed_table();
                ans.put_u32(table + 4*idx,map_offset);
                ans.map_room[idx] = room;
            }
            ans.write_track(idx + MIN_HALF_TRACK,trk)?;
        }
        Ok(ans)
    }
    /// Interpret a byte stream as G64.  Every present track is checked, so a successful
    /// return means the whole image can be loaded.
    pub fn from_bytes(data: &[u8]) -> Result<Self,DYNERR> {
        if data.len() < HEADER_LEN {
            error!("G64 header is truncated");
            return Err(Box::new(img::Error::Truncated));
        }
        let header = match Header::read(&mut Cursor::new(&data[0..HEADER_LEN])) {
            Ok(h) => h,
            Err(e) => {
                debug!("G64 header rejected: {}",e);
                return Err(Box::new(img::Error::BadSignature));
            }
        };
        if header.version != 0 {
            warn!("G64 version {} is unexpected",header.version);
        }
        let entries = header.half_tracks as usize;
        if entries > HALF_TRACK_SLOTS {
            error!("G64 claims {} half tracks",entries);
            return Err(Box::new(img::Error::GeometryMismatch));
        }
        let mut ans = Self { header, file: data.to_vec(), map_room: vec![0;entries] };
        if data.len() < ans.speed_table() + 4*entries {
            error!("G64 track tables are truncated");
            return Err(Box::new(img::Error::Truncated));
        }
        for idx in 0..entries {
            // a map from another tool is only known to be as long as its track
            if let Some(trk) = ans.read_track(idx + MIN_HALF_TRACK)? {
                ans.map_room[idx] = (trk.len()+3)/4;
            }
        }
        Ok(ans)
    }
    pub fn to_bytes(&self) -> Vec<u8> {
        self.file.clone()
    }
    pub fn header(&self) -> &Header {
        &self.header
    }
    /// number of whole tracks the tables can describe
    pub fn track_count(&self) -> usize {
        usize::min(self.header.half_tracks as usize / 2,MAX_TRACKS)
    }
    fn speed_table(&self) -> usize {
        HEADER_LEN + 4*self.header.half_tracks as usize
    }
    fn get_u32(&self,offset: usize) -> Result<usize,DYNERR> {
        match self.file.get(offset..offset+4) {
            Some(b) => Ok(u32::from_le_bytes([b[0],b[1],b[2],b[3]]) as usize),
            None => {
                error!("G64 read past end at {}",offset);
                Err(Box::new(img::Error::Truncated))
            }
        }
    }
    fn put_u32(&mut self,offset: usize,val: usize) {
        self.file[offset..offset+4].copy_from_slice(&u32::to_le_bytes(val as u32));
    }
    /// table index of a half track, or error if the half track is not in the table
    fn entry(&self,half_track: usize) -> Result<usize,DYNERR> {
        if half_track < MIN_HALF_TRACK || half_track - MIN_HALF_TRACK >= self.header.half_tracks as usize {
            error!("half track {} is not in the G64 track table",half_track);
            return Err(Box::new(img::Error::TrackAccess));
        }
        Ok(half_track - MIN_HALF_TRACK)
    }
    /// (track offset, speed descriptor) for a half track
    fn descriptors(&self,half_track: usize) -> Result<(usize,usize),DYNERR> {
        let idx = self.entry(half_track)?;
        Ok((self.get_u32(HEADER_LEN + 4*idx)?,self.get_u32(self.speed_table() + 4*idx)?))
    }
    /// Read one half track, `None` if it is absent from the image.
    pub fn read_track(&self,half_track: usize) -> Result<Option<TrackBuffer>,DYNERR> {
        let (offset,speed) = self.descriptors(half_track)?;
        if offset==0 {
            return Ok(None);
        }
        let label = half_track_label(half_track);
        let len = match self.file.get(offset..offset+2) {
            Some(b) => u16::from_le_bytes([b[0],b[1]]) as usize,
            None => {
                error!("track {} record is truncated",label);
                return Err(Box::new(img::Error::Truncated));
            }
        };
        if len < MIN_TRACK_BYTES || len > NUM_MAX_BYTES_TRACK {
            error!("track {} field length {} is not supported",label,len);
            return Err(Box::new(img::Error::TrackLength(len)));
        }
        let bytes = match self.file.get(offset+2..offset+2+len) {
            Some(b) => b,
            None => {
                error!("track {} data is truncated",label);
                return Err(Box::new(img::Error::Truncated));
            }
        };
        let zones = match speed {
            z if z <= 3 => vec![z as u8;len],
            map_offset => match self.file.get(map_offset..map_offset+(len+3)/4) {
                Some(packed) => unpack_zones(packed,len),
                None => {
                    error!("track {} zone map is truncated",label);
                    return Err(Box::new(img::Error::Truncated));
                }
            }
        };
        trace!("track {} has {} bytes",label,len);
        Ok(Some(TrackBuffer::from_bytes(bytes,&zones)?))
    }
    /// Load every table entry into a buffer, `ans[0]` is half track 2.
    /// Absent half tracks come back unformatted, zone 0, with a default length.
    pub fn load_tracks(&self) -> Result<Vec<TrackBuffer>,DYNERR> {
        let mut ans = Vec::new();
        for idx in 0..HALF_TRACK_SLOTS {
            let maybe_trk = match idx < self.header.half_tracks as usize {
                true => self.read_track(idx + MIN_HALF_TRACK)?,
                false => None
            };
            ans.push(match maybe_trk {
                Some(trk) => trk,
                None => TrackBuffer::new(DEFAULT_TRACK_LEN,0)
            });
        }
        Ok(ans)
    }
    /// Store a half track.  A track that is not yet in the image is appended.
    /// Mixed zones can only be stored if the track already has a packed zone map
    /// with room for every byte.
    pub fn write_track(&mut self,half_track: usize,buf: &TrackBuffer) -> STDRESULT {
        let idx = self.entry(half_track)?;
        let (mut offset,speed) = self.descriptors(half_track)?;
        let label = half_track_label(half_track);
        let slot = self.header.max_track_size as usize;
        if buf.len() < MIN_TRACK_BYTES || buf.len() > slot {
            error!("cannot store track {} with length {}",label,buf.len());
            return Err(Box::new(img::Error::TrackLength(buf.len())));
        }
        let uniform = buf.uniform_zone();
        if !uniform && speed <= 3 {
            error!("track {} has mixed speed zones, adding a zone map is not supported",label);
            return Err(Box::new(img::Error::Unimplemented));
        }
        if speed > 3 {
            let packed = pack_zones(buf.zones());
            if packed.len() > self.map_room[idx] {
                error!("zone map of track {} has room for {} bytes, {} needed",label,self.map_room[idx],packed.len());
                return Err(Box::new(img::Error::TrackLength(buf.len())));
            }
            if speed + packed.len() > self.file.len() {
                error!("track {} zone map does not fit",label);
                return Err(Box::new(img::Error::Truncated));
            }
            self.file[speed..speed+packed.len()].copy_from_slice(&packed);
        } else {
            let table = self.speed_table();
            self.put_u32(table + 4*idx,buf.zone() as usize);
        }
        if offset==0 {
            offset = self.file.len();
            self.put_u32(HEADER_LEN + 4*idx,offset);
            debug!("track {} appended at {}",label,offset);
        }
        if offset + 2 + slot > self.file.len() {
            self.file.resize(offset + 2 + slot,0);
        }
        self.file[offset..offset+2].copy_from_slice(&u16::to_le_bytes(buf.len() as u16));
        let rec = &mut self.file[offset+2..offset+2+slot];
        rec.fill(0);
        rec[0..buf.len()].copy_from_slice(buf.bytes());
        trace!("stored track {}: {}...",label,hex::encode(&buf.bytes()[0..16]));
        Ok(())
    }
    /// Disk ID from the header of track 18 sector 0, if it can be found.
    pub fn disk_id(&self) -> Option<[u8;2]> {
        let trk = self.read_track(36).ok()??;
        let mut curs = gcr::find_sector_header(trk.bytes(),18,0)?;
        curs.rewind(5);
        let hdr = gcr::decode_header(trk.bytes(),curs.pos());
        Some([hdr[5],hdr[4]])
    }
    /// per track lengths and zones for metadata displays, keyed by track or half track
    pub fn track_metadata(&self) -> json::JsonValue {
        let mut ans = json::JsonValue::new_object();
        for idx in 0..self.header.half_tracks as usize {
            let half_track = idx + MIN_HALF_TRACK;
            if let Ok((offset,speed)) = self.descriptors(half_track) {
                if offset==0 {
                    continue;
                }
                let mut obj = json::JsonValue::new_object();
                obj["offset"] = json::JsonValue::from(offset);
                if let Ok(Some(trk)) = self.read_track(half_track) {
                    obj["length"] = json::JsonValue::from(trk.len());
                }
                obj["zone"] = match speed {
                    z if z <= 3 => json::JsonValue::from(z),
                    _ => json::JsonValue::String("mixed".to_string())
                };
                ans[half_track_label(half_track)] = obj;
            }
        }
        ans
    }
}

#[cfg(test)]
fn standard_tracks(count: usize) -> Vec<TrackBuffer> {
    (1..=count).map(|t| TrackBuffer::standard(t)).collect()
}

#[test]
fn zone_packing() {
    let zones = [3,2,1,0,1];
    let packed = pack_zones(&zones);
    assert_eq!(packed,vec![0b11100100,0b01000000]);
    assert_eq!(unpack_zones(&packed,5),zones.to_vec());
}

#[test]
fn create_and_reload() {
    let mut tracks = standard_tracks(35);
    tracks[0].bytes_mut()[0..4].copy_from_slice(&[1,2,3,4]);
    let g64 = G64::create(&tracks).expect("create failed");
    let reload = G64::from_bytes(&g64.to_bytes()).expect("reload failed");
    assert_eq!(reload.header().half_tracks,84);
    let trk = reload.read_track(2).expect("read failed").expect("missing track");
    assert_eq!(trk.len(),7692);
    assert_eq!(trk.zone(),3);
    assert_eq!(trk.bytes()[0..5],[1,2,3,4,0xff]);
    assert!(reload.read_track(3).expect("read failed").is_none());
    assert!(reload.read_track(72).expect("read failed").is_none());
    let all = reload.load_tracks().expect("load failed");
    assert_eq!(all.len(),HALF_TRACK_SLOTS);
    assert_eq!(all[34].len(),7142);
    // absent half tracks are unformatted
    assert_eq!(all[35].len(),6250);
    assert!(all[35].bytes().iter().all(|b| *b==0));
}

#[test]
fn odd_half_tracks() {
    let mut g64 = G64::create(&standard_tracks(35)).expect("create failed");
    let mut trk = TrackBuffer::new(6250,0);
    trk.fill(0xa5);
    g64.write_track(37,&trk).expect("write failed");
    let reload = G64::from_bytes(&g64.to_bytes()).expect("reload failed");
    let all = reload.load_tracks().expect("load failed");
    assert!(all[35].bytes().iter().all(|b| *b==0xa5));
    // the neighbors are untouched
    assert_eq!(all[34].bytes()[0],0xff);
    assert_eq!(all[36].bytes()[0],0xff);
    assert!(reload.track_metadata().has_key("18.5"));
    assert!(g64.write_track(86,&trk).is_err());
    assert!(g64.write_track(1,&trk).is_err());
}

#[test]
fn reject_bad_length() {
    let g64 = G64::create(&standard_tracks(1)).expect("create failed");
    let mut bytes = g64.to_bytes();
    let offset = u32::from_le_bytes([bytes[12],bytes[13],bytes[14],bytes[15]]) as usize;
    bytes[offset..offset+2].copy_from_slice(&u16::to_le_bytes(9000));
    assert!(G64::from_bytes(&bytes).is_err());
    bytes[offset..offset+2].copy_from_slice(&u16::to_le_bytes(4999));
    assert!(G64::from_bytes(&bytes).is_err());
}

#[test]
fn reject_bad_magic_and_truncation() {
    let g64 = G64::create(&standard_tracks(2)).expect("create failed");
    let mut bytes = g64.to_bytes();
    assert!(G64::from_bytes(&bytes[0..100]).is_err());
    let off2 = u32::from_le_bytes([bytes[20],bytes[21],bytes[22],bytes[23]]) as usize;
    assert!(G64::from_bytes(&bytes[0..off2+100]).is_err());
    bytes[9] = 90;
    assert!(G64::from_bytes(&bytes).is_err());
    bytes[9] = 84;
    bytes[0] = b'X';
    assert!(G64::from_bytes(&bytes).is_err());
}

#[test]
fn mixed_zones() {
    let mut g64 = G64::create(&standard_tracks(2)).expect("create failed");
    let mut trk = TrackBuffer::standard(2);
    let mut zones = vec![3;trk.len()];
    zones[100] = 2;
    trk.set_zones(&zones);
    assert!(g64.write_track(4,&trk).is_err());
    // track 2 is unchanged
    let reread = g64.read_track(4).expect("read failed").expect("missing track");
    assert!(reread.uniform_zone());
    // a fresh image made from the mixed track carries a zone map
    let mut g64 = G64::create(&[TrackBuffer::standard(1),trk]).expect("create failed");
    let reread = g64.read_track(4).expect("read failed").expect("missing track");
    assert_eq!(reread.zones()[100],2);
    assert_eq!(reread.zones()[101],3);
    zones[100] = 3;
    zones[200] = 1;
    let mut trk = reread.clone();
    trk.set_zones(&zones);
    g64.write_track(4,&trk).expect("rewrite of zone map failed");
    let reread = g64.read_track(4).expect("read failed").expect("missing track");
    assert_eq!(reread.zones()[100],3);
    assert_eq!(reread.zones()[200],1);
}

#[test]
fn zone_map_cannot_grow() {
    let mut trk = TrackBuffer::new(6000,3);
    trk.fill(0xff);
    let mut zones = vec![3;6000];
    zones[10] = 0;
    trk.set_zones(&zones);
    let g64 = G64::create(&[trk.clone()]).expect("create failed");
    // after a reload the map is only known to hold 6000 zones
    let mut reload = G64::from_bytes(&g64.to_bytes()).expect("reload failed");
    let before = reload.to_bytes();
    let mut longer = TrackBuffer::new(6100,3);
    longer.fill(0xff);
    let mut zones = vec![3;6100];
    zones[10] = 0;
    longer.set_zones(&zones);
    assert!(reload.write_track(2,&longer).is_err());
    assert_eq!(reload.to_bytes(),before);
    reload.write_track(2,&trk).expect("same length should fit");
}
