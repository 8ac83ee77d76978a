pub mod jazzcash;
