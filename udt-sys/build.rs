fn main() {
  println!("cargo:rerun-if-env-changed=UDT_LIB_DIR");

  if std::env::var_os("CARGO_FEATURE_LINK").is_none() {
    return;
  }

  if let Some(dir) = std::env::var_os("UDT_LIB_DIR") {
    println!("cargo:rustc-link-search=native={}", dir.to_string_lossy());
  }
  println!("cargo:rustc-link-lib=dylib=udt");
}
