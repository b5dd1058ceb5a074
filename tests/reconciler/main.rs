mod delete;
mod read;
mod support;
