fn main() {
    if let Err(err) = cloudpipe::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
