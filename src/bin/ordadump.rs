//! Print a per-capture summary of an ORDA .ISE/.SPU file.

use std::env;
use std::fs::File;
use std::io::BufReader;
use std::process;

use ordaiq::CaptureStream;

fn main() {
    ordaiq::tracing_init::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <capture.ISE>", args[0]);
        process::exit(1);
    }

    let file = match File::open(&args[1]) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("{}: {}", args[1], e);
            process::exit(1);
        }
    };

    let mut count = 0usize;
    for capture in CaptureStream::new(BufReader::new(file)) {
        match capture {
            Ok(capture) => {
                println!("{capture}");
                count += 1;
            }
            Err(e) => {
                eprintln!("decode error: {e}");
                process::exit(1);
            }
        }
    }

    println!("{count} captures");
}
