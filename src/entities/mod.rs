pub mod barcode;
pub mod batch;
pub mod quality_test;
pub mod sku;
pub mod test_answer;
pub mod test_question;
pub mod test_template;
pub mod user;
