pub mod kiro;
