mod cli;
mod concurrency;
mod properties;
mod scenarios;
