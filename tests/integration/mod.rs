// Integration tests harness
mod ffi {
    include!("ffi.rs");
}
mod ffi_callbacks {
    include!("ffi-callbacks.rs");
}
mod ffi_marshaling {
    include!("ffi-marshaling.rs");
}
mod ffi_struct_marshaling {
    include!("ffi-struct-marshaling.rs");
}
