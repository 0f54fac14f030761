//! Parse drive settings sent by the host emulator.
//!
//! Settings arrive as a JSON string.  Keys that are missing keep their defaults and
//! unknown keys are ignored, so a host can send only what it cares about.

use serde::{Serialize,Deserialize};
use crate::DYNERR;
use super::rotation::{TableKey,DRIVE_CLOCK_HZ};
use crate::img::tracks::ROT_SPEED_BPS;

/// What to do when the firmware writes past the end of a sector image.
#[derive(Clone,Copy,Debug,PartialEq,Eq,Serialize,Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtendPolicy {
    /// never grow the image, writes past the end are dropped (and logged)
    Never,
    /// ask the host once per attached disk
    Ask,
    /// grow the image whenever it is needed
    Always
}

#[derive(Clone,Debug,PartialEq,Serialize,Deserialize)]
#[serde(default,rename_all = "camelCase")]
pub struct Settings {
    pub extend_policy: ExtendPolicy,
    /// drive CPU clock in Hz
    pub clock_hz: u32,
    /// cycles after attaching before the disk can be read
    pub attach_delay: u64,
    /// cycles after detaching during which write protect reads as off
    pub detach_delay: u64,
    /// bit rate of each speed zone
    pub zone_speeds: [u32;4]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            extend_policy: ExtendPolicy::Never,
            clock_hz: DRIVE_CLOCK_HZ,
            attach_delay: 3*600_000,
            detach_delay: 3*200_000,
            zone_speeds: ROT_SPEED_BPS
        }
    }
}

impl Settings {
    pub fn table_key(&self) -> TableKey {
        TableKey { speeds: self.zone_speeds, clock_hz: self.clock_hz }
    }
}

pub fn parse(json: &str) -> Result<Settings,DYNERR> {
    match serde_json::from_str::<Settings>(json) {
        Ok(ans) => Ok(ans),
        Err(e) => {
            log::error!("could not parse drive settings: {}",e);
            Err(Box::new(e))
        }
    }
}

#[test]
fn partial_settings() {
    let s = parse("{\"extendPolicy\": \"ask\", \"clockHz\": 985248, \"colors\": 16}").expect("parse failed");
    assert_eq!(s.extend_policy,ExtendPolicy::Ask);
    assert_eq!(s.clock_hz,985248);
    assert_eq!(s.attach_delay,1_800_000);
    assert_eq!(s.zone_speeds,ROT_SPEED_BPS);
    assert!(parse("{\"extendPolicy\": \"sometimes\"}").is_err());
}
