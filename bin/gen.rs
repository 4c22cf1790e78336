use clap::{Arg, Command};
use std::io::{self, Write};

const TYPES: [&str; 3] = ["Full Set (FS)", "Decoder Only (DO)", "DVS"];
const REGIONS: [&str; 3] = ["Dar es Salaam, Region", "Arusha", "Mwanza"];

fn main() -> anyhow::Result<()> {
    let matches = Command::new("gen")
        .about("Write a sample stock upload CSV to stdout")
        .arg(
            Arg::new("rows")
                .long("rows")
                .value_parser(clap::value_parser!(u64))
                .required(true),
        )
        .arg(
            Arg::new("blank_every")
                .long("blank-every")
                .help("Leave the type cell empty on every Nth row (0 = never)")
                .value_parser(clap::value_parser!(u64))
                .default_value("0"),
        )
        .arg(
            Arg::new("with_region")
                .long("with-region")
                .help("Add a quoted region column (ignored on upload)")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let rows: u64 = *matches.get_one("rows").unwrap();
    let blank_every: u64 = *matches.get_one("blank_every").unwrap();
    let with_region = matches.get_flag("with_region");

    let mut out = io::BufWriter::new(io::stdout().lock());

    // Spelled the way operators type it; normalized on ingest.
    write!(&mut out, "Type,Smartcard Number,Serial No")?;
    if with_region {
        write!(&mut out, ",Region")?;
    }
    writeln!(&mut out)?;

    for i in 0..rows {
        let ty = if blank_every > 0 && (i + 1) % blank_every == 0 {
            ""
        } else {
            TYPES[(i % TYPES.len() as u64) as usize]
        };
        write!(&mut out, "{ty},SC{:08},SN{:010}", 1000 + i, i)?;
        if with_region {
            write!(&mut out, ",\"{}\"", REGIONS[(i % REGIONS.len() as u64) as usize])?;
        }
        writeln!(&mut out)?;
        if i % 10_000 == 0 {
            out.flush()?;
        }
    }

    out.flush()?;
    Ok(())
}
