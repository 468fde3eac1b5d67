fn main() {
    let exit_code = match opgraph::run() {
        Ok(code) => code,
        Err(err) => {
            println!("opgraph: error: {:#}", err);
            1
        }
    };
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}
