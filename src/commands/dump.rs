use clap;
use log::error;
use super::CommandError;
use crate::img::tracks::{track_slot,MAX_TRACKS};
use crate::STDRESULT;

const RCH: &str = "unreachable was reached";

/// Hex dump of the GCR bytes of one track
pub fn dump(cmd: &clap::ArgMatches) -> STDRESULT {
    let img_path = cmd.get_one::<String>("dimg").expect(RCH);
    let track = *cmd.get_one::<usize>("track").expect(RCH);
    if track < 1 || track > MAX_TRACKS {
        error!("track must be from 1 to {}",MAX_TRACKS);
        return Err(Box::new(CommandError::OutOfRange));
    }
    let mut img = crate::create_img_from_file(img_path)?;
    let tracks = super::image_tracks(&mut img)?;
    let buf = &tracks[track_slot(track)];
    eprintln!("track {}: {} bytes, zone {}",track,buf.len(),buf.zone());
    crate::display_block(0,buf.bytes());
    Ok(())
}
