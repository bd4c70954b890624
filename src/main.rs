use cas_loadtest::LoadTest;

#[tokio::main]
async fn main() {
    let result = match LoadTest::initialize() {
        Ok(load_test) => load_test.execute().await,
        Err(e) => Err(e),
    };
    // Failed logins don't fail the run, only being unable to start it does.
    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
