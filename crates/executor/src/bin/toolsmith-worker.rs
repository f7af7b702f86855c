fn main() -> std::process::ExitCode {
    toolsmith_executor::worker::run()
}
