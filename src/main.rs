fn main() {
    if let Err(e) = seltrans_lib::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
