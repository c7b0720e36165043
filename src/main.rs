fn main() {
    if let Err(e) = worktimer_lib::run() {
        eprintln!("worktimer: {}", e);
        std::process::exit(1);
    }
}
