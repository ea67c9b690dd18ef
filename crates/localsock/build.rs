// Bake the build triple and profile into `localsock version --extended`.
fn main() {
    for (source, exported) in [
        ("TARGET", "LOCALSOCK_BUILD_TARGET"),
        ("PROFILE", "LOCALSOCK_BUILD_PROFILE"),
    ] {
        if let Ok(value) = std::env::var(source) {
            println!("cargo:rustc-env={exported}={value}");
        }
        println!("cargo:rerun-if-env-changed={source}");
    }
}
