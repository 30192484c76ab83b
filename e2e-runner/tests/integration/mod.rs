mod cli_tests;
#[cfg(unix)]
mod library_tests;
#[cfg(unix)]
mod run_tests;
