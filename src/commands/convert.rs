//! ## convert a sector image to a bit image
//!
//! The sectors are laid out on tracks exactly as the drive would see them after
//! attaching, including any damage recorded in the error map.

use clap;
use log::{info,error};
use super::CommandError;
use crate::img::g64::G64;
use crate::img::DiskImage;
use crate::img::tracks::TrackBuffer;
use crate::STDRESULT;

const RCH: &str = "unreachable was reached";

pub fn convert(cmd: &clap::ArgMatches) -> STDRESULT {
    let src_path = cmd.get_one::<String>("dimg").expect(RCH);
    let dst_path = cmd.get_one::<String>("output").expect(RCH);
    let mut img = crate::create_img_from_file(src_path)?;
    if !super::is_sector_image(&img) {
        error!("source must be a sector image");
        return Err(Box::new(CommandError::UnsupportedFormat));
    }
    let count = img.track_count();
    let tracks: Vec<TrackBuffer> = super::image_tracks(&mut img)?.into_iter().step_by(2).take(count).collect();
    let g64 = G64::create(&tracks)?;
    info!("converted {} tracks",count);
    crate::save_img(&DiskImage::from_g64(g64),dst_path)
}
