mod tests_sources;
