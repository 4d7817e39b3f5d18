//! Software conversion between `f64` and the platform `long double`.
//!
//! Rust has no extended-precision float, so `long double` values are held
//! as `f64` and converted to the platform storage format on write. Reads
//! round to nearest, ties to even.
//!
//! | target                 | format                          |
//! |------------------------|---------------------------------|
//! | x86, x86-64            | x87 80-bit extended (padded)    |
//! | AArch64 (non-Apple)    | IEEE 754 binary128              |
//! | everything else        | same as `double`                |

const EXP_BIAS: i32 = 16383;
const EXP_MAX: u16 = 0x7fff;
const F64_FRAC_MASK: u64 = (1 << 52) - 1;

/// A 15-bit-exponent value with an explicit integer bit, the common
/// shape of both extended formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Extended {
    sign: bool,
    exponent: u16,
    mantissa: u64,
}

fn widen(value: f64) -> Extended {
    let bits = value.to_bits();
    let sign = bits >> 63 != 0;
    let exp = ((bits >> 52) & 0x7ff) as i32;
    let frac = bits & F64_FRAC_MASK;

    let (exponent, mantissa) = if exp == 0x7ff {
        (EXP_MAX, (1 << 63) | (frac << 11))
    } else if exp == 0 {
        if frac == 0 {
            (0, 0)
        } else {
            // f64 subnormals are normal in the wider format.
            let top = 63 - frac.leading_zeros() as i32;
            let exponent = (top - 1074 + EXP_BIAS) as u16;
            (exponent, frac << (63 - top))
        }
    } else {
        ((exp - 1023 + EXP_BIAS) as u16, (1 << 63) | (frac << 11))
    };
    Extended {
        sign,
        exponent,
        mantissa,
    }
}

fn narrow(ext: Extended) -> f64 {
    let sign_bit = (ext.sign as u64) << 63;

    if ext.exponent == EXP_MAX {
        let payload = (ext.mantissa << 1) >> 12;
        if ext.mantissa << 1 == 0 {
            return f64::from_bits(sign_bit | (0x7ff << 52));
        }
        return f64::from_bits(sign_bit | (0x7ff << 52) | payload | (1 << 51));
    }
    if ext.mantissa == 0 {
        return f64::from_bits(sign_bit);
    }

    // Denormals of the wide format use exponent 1 without an integer bit.
    let mut e = if ext.exponent == 0 {
        1 - EXP_BIAS
    } else {
        ext.exponent as i32 - EXP_BIAS
    };
    let lz = ext.mantissa.leading_zeros();
    let mantissa = ext.mantissa << lz;
    e -= lz as i32;

    if e > 1023 {
        return f64::from_bits(sign_bit | (0x7ff << 52));
    }

    // Number of low mantissa bits dropped to land on the f64 grid.
    let shift: u32 = if e >= -1022 {
        11
    } else {
        (11 - 1022 - e) as u32
    };
    if shift >= 66 {
        return f64::from_bits(sign_bit);
    }

    let wide = mantissa as u128;
    let mut kept = (wide >> shift) as u64;
    let rem = wide & ((1u128 << shift) - 1);
    let half = 1u128 << (shift - 1);
    if rem > half || (rem == half && kept & 1 == 1) {
        kept += 1;
    }

    if e >= -1022 {
        // kept includes the integer bit at 1 << 52; a carry moves it to 1 << 53.
        let mut biased = (e + 1023) as u64;
        if kept >> 53 != 0 {
            kept >>= 1;
            biased += 1;
        }
        if biased >= 0x7ff {
            return f64::from_bits(sign_bit | (0x7ff << 52));
        }
        f64::from_bits(sign_bit | (biased << 52) | (kept & F64_FRAC_MASK))
    } else {
        // Subnormal result: a carry into bit 52 yields the smallest normal.
        f64::from_bits(sign_bit | kept)
    }
}

/// Encode as x87 80-bit extended precision (10 significant bytes).
pub fn x87_encode(value: f64) -> [u8; 10] {
    let ext = widen(value);
    let mut out = [0u8; 10];
    out[..8].copy_from_slice(&ext.mantissa.to_le_bytes());
    let top = ((ext.sign as u16) << 15) | ext.exponent;
    out[8..].copy_from_slice(&top.to_le_bytes());
    out
}

pub fn x87_decode(bytes: &[u8; 10]) -> f64 {
    let mut mant = [0u8; 8];
    mant.copy_from_slice(&bytes[..8]);
    let top = u16::from_le_bytes([bytes[8], bytes[9]]);
    narrow(Extended {
        sign: top >> 15 != 0,
        exponent: top & EXP_MAX,
        mantissa: u64::from_le_bytes(mant),
    })
}

/// Encode as IEEE 754 binary128.
pub fn binary128_encode(value: f64) -> [u8; 16] {
    let ext = widen(value);
    let frac = ((ext.mantissa & !(1u64 << 63)) as u128) << 49;
    let bits = ((ext.sign as u128) << 127) | ((ext.exponent as u128) << 112) | frac;
    bits.to_le_bytes()
}

pub fn binary128_decode(bytes: &[u8; 16]) -> f64 {
    let bits = u128::from_le_bytes(*bytes);
    let sign = bits >> 127 != 0;
    let exponent = ((bits >> 112) as u16) & EXP_MAX;
    let frac = bits & ((1u128 << 112) - 1);

    let integer_bit = if exponent == 0 || exponent == EXP_MAX {
        0
    } else {
        1u64 << 63
    };
    // Keep the top 63 fraction bits and fold the rest into a sticky bit.
    let sticky = (frac & ((1u128 << 49) - 1) != 0) as u64;
    let mut mantissa = integer_bit | ((frac >> 49) as u64) | sticky;
    if exponent == EXP_MAX {
        // narrow() tells infinity from NaN by the bits below the integer bit.
        mantissa = (1 << 63) | ((frac >> 49) as u64) | sticky;
    }
    narrow(Extended {
        sign,
        exponent,
        mantissa,
    })
}

/// Write `value` in the platform `long double` format. `out` must be at
/// least `FloatKind::LongDouble.size()` bytes.
pub fn encode_long_double(value: f64, out: &mut [u8]) {
    #[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
    {
        out[..10].copy_from_slice(&x87_encode(value));
        out[10..].fill(0);
    }
    #[cfg(all(
        target_arch = "aarch64",
        not(target_vendor = "apple"),
        not(target_os = "windows")
    ))]
    {
        out[..16].copy_from_slice(&binary128_encode(value));
    }
    #[cfg(not(any(
        target_arch = "x86_64",
        target_arch = "x86",
        all(
            target_arch = "aarch64",
            not(target_vendor = "apple"),
            not(target_os = "windows")
        )
    )))]
    {
        out[..8].copy_from_slice(&value.to_ne_bytes());
    }
}

/// Read a platform `long double`, rounding to `f64`.
pub fn decode_long_double(bytes: &[u8]) -> f64 {
    #[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
    {
        let mut raw = [0u8; 10];
        raw.copy_from_slice(&bytes[..10]);
        x87_decode(&raw)
    }
    #[cfg(all(
        target_arch = "aarch64",
        not(target_vendor = "apple"),
        not(target_os = "windows")
    ))]
    {
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&bytes[..16]);
        binary128_decode(&raw)
    }
    #[cfg(not(any(
        target_arch = "x86_64",
        target_arch = "x86",
        all(
            target_arch = "aarch64",
            not(target_vendor = "apple"),
            not(target_os = "windows")
        )
    )))]
    {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        f64::from_ne_bytes(raw)
    }
}
