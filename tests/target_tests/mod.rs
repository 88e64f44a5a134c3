mod cli_test;
mod native_target_test;
