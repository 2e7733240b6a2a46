mod tests_varint;
