// Layout cross-checks: the descriptor's own size, alignment and offsets
// must agree with what libffi computes for the same type.

use super::strategies::{arb_struct, arb_type};
use libffi::raw;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn offsets_match_libffi(desc in arb_struct()) {
        let expected = desc.member_offsets().unwrap();
        let ffi_type = desc.to_ffi_type().unwrap();
        let mut offsets = vec![0usize; expected.len()];
        let status = unsafe {
            raw::ffi_get_struct_offsets(
                raw::ffi_abi_FFI_DEFAULT_ABI,
                ffi_type.as_raw_ptr(),
                offsets.as_mut_ptr(),
            )
        };
        prop_assert_eq!(status, raw::ffi_status_FFI_OK);
        prop_assert_eq!(offsets, expected);

        // ffi_get_struct_offsets initializes the aggregate's size and alignment.
        let (size, align) = unsafe {
            let raw_type = &*ffi_type.as_raw_ptr();
            (raw_type.size, raw_type.alignment as usize)
        };
        prop_assert_eq!(size, desc.size());
        prop_assert_eq!(align, desc.alignment());
    }

    #[test]
    fn size_is_multiple_of_alignment(desc in arb_type()) {
        prop_assert!(desc.alignment().is_power_of_two());
        prop_assert_eq!(desc.size() % desc.alignment(), 0);
    }

    #[test]
    fn members_do_not_overlap(desc in arb_struct()) {
        let dynffi::ffi::TypeDesc::Struct(st) = &desc else {
            unreachable!();
        };
        let mut end = 0;
        for (offset, member) in st.fields() {
            prop_assert!(offset >= end);
            prop_assert_eq!(offset % member.alignment(), 0);
            end = offset + member.size();
        }
        prop_assert!(end <= desc.size());
    }
}
