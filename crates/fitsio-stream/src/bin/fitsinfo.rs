use std::process;

use fitsio_stream::header::find_card;
use fitsio_stream::{FitsReader, Hdu, Value};

fn format_hdu(index: usize, hdu: &Hdu) -> String {
    let d = hdu.descriptor();
    let mut out = String::new();
    if d.is_primary {
        out.push_str(&format!("HDU {}: Primary\n", index));
    } else {
        let xtension = hdu
            .card("XTENSION")
            .and_then(|c| c.value())
            .and_then(Value::as_str)
            .unwrap_or("?");
        let cards = hdu.logical_cards();
        let extname = find_card(&cards, "EXTNAME")
            .and_then(|c| c.value())
            .and_then(Value::as_str)
            .map(|name| format!(" (EXTNAME: {})", name))
            .unwrap_or_default();
        out.push_str(&format!("HDU {}: {} extension{}\n", index, xtension, extname));
    }
    out.push_str(&format!("  BITPIX: {}\n", d.element_type.bitpix()));
    out.push_str(&format!("  NAXIS: {}\n", d.dimensions.len()));
    if !d.dimensions.is_empty() {
        out.push_str(&format!("  Dimensions: {:?}\n", d.dimensions));
    }
    if d.param_count > 0 || d.group_count != 1 {
        out.push_str(&format!("  PCOUNT: {}\n", d.param_count));
        out.push_str(&format!("  GCOUNT: {}\n", d.group_count));
    }
    out.push_str(&format!("  Keys: {}\n", d.key_count));
    out.push_str(&format!("  Data size: {} bytes\n", d.byte_size()));
    out
}

fn format_verbose_cards(hdu: &Hdu) -> String {
    let mut out = String::from("  Header cards:\n");
    for card in hdu.logical_cards() {
        match (card.value(), card.comment()) {
            (Some(val), "") => out.push_str(&format!("    {} = {:?}\n", card.name(), val)),
            (Some(val), comment) => {
                out.push_str(&format!("    {} = {:?} / {}\n", card.name(), val, comment))
            }
            (None, "") if card.name().is_empty() => {}
            (None, comment) => out.push_str(&format!("    {} {}\n", card.name(), comment)),
        }
    }
    out
}

fn format_fits_info(hdus: &[Hdu], verbose: bool) -> String {
    let mut out = String::new();
    for (i, hdu) in hdus.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format_hdu(i, hdu));
        if verbose {
            out.push_str(&format_verbose_cards(hdu));
        }
    }
    out
}

async fn run(args: &[String]) -> Result<String, String> {
    let mut verbose = false;
    let mut file_path = None;

    for arg in args {
        if arg == "-v" || arg == "--verbose" {
            verbose = true;
        } else if arg.starts_with('-') {
            return Err(format!("Unknown option: {}", arg));
        } else {
            if file_path.is_some() {
                return Err("Too many arguments".to_string());
            }
            file_path = Some(arg.as_str());
        }
    }

    let path = file_path.ok_or_else(|| {
        "Usage: fitsinfo [-v] <file.fits>\n\nPrint HDU summary for a FITS file.".to_string()
    })?;

    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| format!("Error reading '{}': {}", path, e))?;
    let reader = FitsReader::new(file).map_err(|e| format!("Error reading '{}': {}", path, e))?;
    let hdus = reader
        .read_all()
        .await
        .map_err(|e| format!("Error parsing '{}': {}", path, e))?;

    Ok(format_fits_info(&hdus, verbose))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args).await {
        Ok(output) => print!("{}", output),
        Err(msg) => {
            eprintln!("{}", msg);
            process::exit(1);
        }
    }
}
