pub mod zmodem;
