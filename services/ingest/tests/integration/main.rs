mod ingest_test;
mod publisher_test;
