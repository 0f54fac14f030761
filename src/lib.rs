//! # `gcr1541` main library
//!
//! This library emulates the floppy medium of a Commodore 1541 class drive: the spinning
//! disk, the GCR bit stream on each track, the read/write head, and the disk images that
//! persist it.  The drive firmware runs on an external CPU core, which calls into this
//! library whenever it touches a disk controller register.
//!
//! ## Architecture
//!
//! * `img::DiskImage` is the disk itself, backed either by decoded sectors (D64) or by
//!   the raw track stream (G64)
//! * `img::tracks` holds the GCR track buffers and the sector frame codec
//! * `drive::DriveContext` is one drive unit: track buffers, head, rotation, and the
//!   register callbacks
//! * `drive::sync` moves data between track buffers and the image
//!
//! When a `DriveContext` attaches a `DiskImage` it takes ownership of it.  Changes are
//! written back into the image as the head leaves a track, and are not permanent until
//! the detached image is saved to whatever file system is hosting the emulator.
//!
//! ## Disk Images
//!
//! * D64, 35, 40, or 42 tracks, with or without error map
//! * G64

pub mod img;
pub mod drive;
pub mod commands;

use img::DiskImage;
use log::{warn,info,error};

type DYNERR = Box<dyn std::error::Error>;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

const KNOWN_FILE_EXTENSIONS: &str = "d64,g64";
const G64_MAGIC: &[u8] = b"GCR-1541";

/// Save the image file (make changes permanent)
pub fn save_img(img: &DiskImage,img_path: &str) -> STDRESULT {
    std::fs::write(img_path,img.to_bytes())?;
    Ok(())
}

/// Given a bytestream return a disk image, or Err if the bytestream cannot be interpreted.
/// Optional `maybe_ext` restricts the image types that will be tried based on file extension.
/// A stream with the G64 signature is never reinterpreted as something else.
pub fn create_img_from_bytestream(disk_img_data: &[u8],maybe_ext: Option<&str>) -> Result<DiskImage,DYNERR> {
    let ext = match maybe_ext {
        Some(x) => x.to_string().to_lowercase(),
        None => "".to_string()
    };
    if img::g64::file_extensions().contains(&ext) || ext=="" {
        if disk_img_data.starts_with(G64_MAGIC) {
            return match img::g64::G64::from_bytes(disk_img_data) {
                Ok(g64) => {
                    info!("identified G64 image");
                    Ok(DiskImage::from_g64(g64))
                },
                Err(e) => {
                    error!("G64 image could not be loaded: {}",e);
                    Err(e)
                }
            };
        }
    }
    if img::d64::file_extensions().contains(&ext) || ext=="" {
        if let Ok(d64) = img::d64::D64::from_bytes(disk_img_data) {
            info!("identified D64 image");
            return DiskImage::from_sectors(img::DiskImageType::D64,Box::new(d64));
        }
    }
    warn!("cannot match any image format");
    return Err(Box::new(img::Error::ImageTypeMismatch));
}

/// Calls `create_img_from_bytestream` getting the bytes from a file.
/// File extension will be used to restrict image types that are tried,
/// unless the extension is unknown, in which case all will be tried.
pub fn create_img_from_file(img_path: &str) -> Result<DiskImage,DYNERR> {
    match std::fs::read(img_path) {
        Ok(disk_img_data) => {
            let mut maybe_ext = img_path.split('.').last();
            if let Some(ext) = maybe_ext {
                if !KNOWN_FILE_EXTENSIONS.split(',').any(|x| x==ext.to_lowercase()) {
                    maybe_ext = None;
                }
            }
            create_img_from_bytestream(&disk_img_data,maybe_ext)
        },
        Err(e) => Err(Box::new(e))
    }
}

/// Display binary to stdout in columns of hex and ascii
pub fn display_block(start_addr: u16,block: &[u8]) {
    let mut slice_start = 0;
    while slice_start < block.len() {
        let row_label = start_addr as usize + slice_start;
        let slice_end = usize::min(slice_start + 16,block.len());
        let slice = &block[slice_start..slice_end];
        let txt: Vec<u8> = slice.iter().map(|c| match *c {
            x if x<32 => '.' as u8,
            x if x<127 => x,
            _ => '.' as u8
        }).collect();
        print!("{:04X} : ",row_label);
        for byte in slice {
            print!("{:02X} ",byte);
        }
        for _blank in slice_end..slice_start+16 {
            print!("   ");
        }
        println!("| {}",String::from_utf8_lossy(&txt));
        slice_start += 16;
    }
}
