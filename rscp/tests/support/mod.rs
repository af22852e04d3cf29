pub mod fake_scp;
