//! # CLI Subcommands
//! 
//! Contains modules that run the subcommands.

pub mod stat;
pub mod convert;
pub mod dump;

use crate::img::{Backing,DiskImage};
use crate::img::tracks::TrackBuffer;
use crate::drive::settings::ExtendPolicy;
use crate::drive::sync::TrackSynchronizer;
use crate::DYNERR;

#[derive(thiserror::Error,Debug)]
pub enum CommandError {
    #[error("Command could not be interpreted")]
    InvalidCommand,
    #[error("One of the parameters was out of range")]
    OutOfRange,
    #[error("Input source is not supported")]
    UnsupportedFormat
}

/// Lay the image out on track buffers the way a drive would see it, `ans[0]` is half track 2.
fn image_tracks(img: &mut DiskImage) -> Result<Vec<TrackBuffer>,DYNERR> {
    let mut sync = TrackSynchronizer::new(ExtendPolicy::Never);
    sync.attach(img)
}

/// true if the image stores sectors rather than raw tracks
fn is_sector_image(img: &DiskImage) -> bool {
    match img.backing() {
        Backing::Sectors(_) => true,
        Backing::Bits(_) => false
    }
}
