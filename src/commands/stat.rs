use clap;
use crate::STDRESULT;

const RCH: &str = "unreachable was reached";

pub fn info(cmd: &clap::ArgMatches) -> STDRESULT {
    let img_path = cmd.get_one::<String>("dimg").expect(RCH);
    let img = crate::create_img_from_file(img_path)?;
    println!("{}",img.get_metadata(cmd.get_one::<u16>("indent").copied()));
    return Ok(());
}
