fn main() {
    range_pipeline::cli::run();
}
