fn main() {
    std::process::exit(igrelease::cli::run());
}
