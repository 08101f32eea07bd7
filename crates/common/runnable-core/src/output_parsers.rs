mod string;

pub use string::StrOutputParser;
