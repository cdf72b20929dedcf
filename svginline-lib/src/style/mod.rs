pub mod css_matcher;
pub mod scanner;
pub mod sheets;
