pub mod journal_reader;
pub mod order_writer;
