pub mod corpus;
pub mod evaluation;
pub mod report;
