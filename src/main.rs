use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    streamscribe::cli::main()
}
