fn main() {
    // Ruta de búsqueda para ONNX Runtime (solo con la feature `onnx`)
    println!("cargo:rerun-if-env-changed=ORT_LIB_DIR");

    if std::env::var_os("CARGO_FEATURE_ONNX").is_none() {
        return;
    }

    if let Ok(dir) = std::env::var("ORT_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir);
        // Recompilar si cambia el directorio de ONNX Runtime
        println!("cargo:rerun-if-changed={}", dir);
    }
}
