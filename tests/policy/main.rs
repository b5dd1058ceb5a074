mod catalog_fetch;
mod scenarios;
