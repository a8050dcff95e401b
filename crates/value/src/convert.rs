use super::{Error, Result, Type, Value};

// Every integer variant widens losslessly into i128, which centralizes the
// range checks of the narrowing accessors below.
impl Value {
    fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Int8(n) => Some(*n as i128),
            Value::Int16(n) => Some(*n as i128),
            Value::Int32(n) => Some(*n as i128),
            Value::Int64(n) => Some(*n as i128),
            Value::Uint8(n) => Some(*n as i128),
            Value::Uint16(n) => Some(*n as i128),
            Value::Uint32(n) => Some(*n as i128),
            Value::Uint64(n) => Some(*n as i128),
            _ => None,
        }
    }

    fn as_float_variant(&self) -> Option<f64> {
        match self {
            Value::Float32(f) => Some(*f as f64),
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }
}

// A float converts to an integer iff it is finite, integral, and within the
// target's two's-complement range. The upper bound is exclusive: 2^63 is
// representable as f64 but is one past i64::MAX.
fn float_to_integer<T: TryFrom<i128>>(f: f64, target: Type) -> Result<T> {
    let out_of_range = || Error::OutOfRange {
        value: f.to_string(),
        target,
    };

    if !f.is_finite() || f.fract() != 0.0 {
        return Err(out_of_range());
    }
    if f < -(2f64.powi(127)) || f >= 2f64.powi(127) {
        return Err(out_of_range());
    }
    T::try_from(f as i128).map_err(|_| out_of_range())
}

macro_rules! integer_accessor {
    ($(#[$doc:meta])* $method:ident, $ty:ty, $tag:expr) => {
        $(#[$doc])*
        pub fn $method(&self) -> Result<$ty> {
            if let Some(i) = self.as_integer() {
                return <$ty>::try_from(i).map_err(|_| Error::OutOfRange {
                    value: i.to_string(),
                    target: $tag,
                });
            }
            if let Some(f) = self.as_float_variant() {
                return float_to_integer(f, $tag);
            }
            Err(Error::TypeMismatch {
                expected: $tag,
                actual: self.value_type(),
            })
        }
    };
}

impl Value {
    integer_accessor!(
        /// Read this Value as an i8, narrowing if the content fits.
        as_i8, i8, Type::Int8
    );
    integer_accessor!(as_i16, i16, Type::Int16);
    integer_accessor!(as_i32, i32, Type::Int32);
    integer_accessor!(as_i64, i64, Type::Int64);
    integer_accessor!(as_u8, u8, Type::Uint8);
    integer_accessor!(as_u16, u16, Type::Uint16);
    integer_accessor!(as_u32, u32, Type::Uint32);
    integer_accessor!(as_u64, u64, Type::Uint64);

    /// Read this Value as an f32. Integers convert iff the f32 mantissa
    /// represents them exactly; an f64 converts iff narrowing round-trips.
    pub fn as_f32(&self) -> Result<f32> {
        if let Some(i) = self.as_integer() {
            let f = i as f32;
            if f.is_finite() && f as i128 == i {
                return Ok(f);
            }
            return Err(Error::OutOfRange {
                value: i.to_string(),
                target: Type::Float32,
            });
        }
        match self {
            Value::Float32(f) => Ok(*f),
            Value::Float64(f) if f.is_nan() => Ok(f32::NAN),
            Value::Float64(f) => {
                let narrowed = *f as f32;
                if narrowed as f64 == *f {
                    Ok(narrowed)
                } else {
                    Err(Error::OutOfRange {
                        value: f.to_string(),
                        target: Type::Float32,
                    })
                }
            }
            other => Err(Error::TypeMismatch {
                expected: Type::Float32,
                actual: other.value_type(),
            }),
        }
    }

    /// Read this Value as an f64. Integers convert iff exactly representable.
    pub fn as_f64(&self) -> Result<f64> {
        if let Some(i) = self.as_integer() {
            let f = i as f64;
            if f as i128 == i {
                return Ok(f);
            }
            return Err(Error::OutOfRange {
                value: i.to_string(),
                target: Type::Float64,
            });
        }
        match self {
            Value::Float32(f) => Ok(*f as f64),
            Value::Float64(f) => Ok(*f),
            other => Err(Error::TypeMismatch {
                expected: Type::Float64,
                actual: other.value_type(),
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::Value;

    #[test]
    fn test_integer_narrowing_boundaries() {
        // (source, fits_i8, fits_u8, fits_i16)
        for (source, fits_i8, fits_u8, fits_i16) in [
            (Value::Int64(127), true, true, true),
            (Value::Int64(128), false, true, true),
            (Value::Int64(-128), true, false, true),
            (Value::Int64(-129), false, false, true),
            (Value::Int64(255), false, true, true),
            (Value::Int64(256), false, false, true),
            (Value::Int64(32767), false, false, true),
            (Value::Int64(32768), false, false, false),
            (Value::Int64(-32768), false, false, true),
            (Value::Int64(-32769), false, false, false),
            (Value::Uint64(127), true, true, true),
            (Value::Uint64(u64::MAX), false, false, false),
        ] {
            assert_eq!(source.as_i8().is_ok(), fits_i8, "{source:?} as i8");
            assert_eq!(source.as_u8().is_ok(), fits_u8, "{source:?} as u8");
            assert_eq!(source.as_i16().is_ok(), fits_i16, "{source:?} as i16");
        }
    }

    #[test]
    fn test_signedness_boundaries() {
        assert_eq!(Value::Int64(-1).as_u64().is_ok(), false);
        assert_eq!(Value::Int64(0).as_u64().unwrap(), 0);
        assert_eq!(Value::Uint64(i64::MAX as u64).as_i64().unwrap(), i64::MAX);
        assert_eq!(Value::Uint64(i64::MAX as u64 + 1).as_i64().is_ok(), false);
        assert_eq!(Value::Int32(-1).as_u32().is_ok(), false);
        assert_eq!(Value::Uint32(u32::MAX).as_i32().is_ok(), false);
    }

    #[test]
    fn test_float_to_integer() {
        assert_eq!(Value::Float64(42.0).as_i8().unwrap(), 42);
        assert_eq!(Value::Float64(42.5).as_i8().is_ok(), false);
        assert_eq!(Value::Float64(127.0).as_i8().unwrap(), 127);
        assert_eq!(Value::Float64(128.0).as_i8().is_ok(), false);
        assert_eq!(Value::Float64(-128.0).as_i8().unwrap(), -128);
        assert_eq!(Value::Float64(-129.0).as_i8().is_ok(), false);
        assert_eq!(Value::Float64(-1.0).as_u64().is_ok(), false);

        // 2^63 is exactly representable as f64 but is one past i64::MAX.
        assert_eq!(Value::Float64(2f64.powi(63)).as_i64().is_ok(), false);
        assert_eq!(
            Value::Float64(2f64.powi(63)).as_u64().unwrap(),
            1u64 << 63
        );
        assert_eq!(Value::Float64(2f64.powi(64)).as_u64().is_ok(), false);

        assert_eq!(Value::Float64(f64::NAN).as_i64().is_ok(), false);
        assert_eq!(Value::Float64(f64::INFINITY).as_i64().is_ok(), false);
        assert_eq!(Value::Float32(7.0).as_i32().unwrap(), 7);
    }

    #[test]
    fn test_integer_to_float_exactness() {
        // 2^24 is the last contiguous integer an f32 mantissa can hold.
        assert_eq!(Value::Int64(1 << 24).as_f32().unwrap(), 16_777_216.0);
        assert_eq!(Value::Int64((1 << 24) + 1).as_f32().is_ok(), false);
        assert_eq!(Value::Int64(-(1 << 24)).as_f32().unwrap(), -16_777_216.0);

        // Likewise 2^53 for f64.
        assert_eq!(Value::Int64(1 << 53).as_f64().unwrap(), 9_007_199_254_740_992.0);
        assert_eq!(Value::Int64((1 << 53) + 1).as_f64().is_ok(), false);
        assert_eq!(Value::Uint64((1 << 53) + 2).as_f64().unwrap(), 9_007_199_254_740_994.0);
    }

    #[test]
    fn test_float_narrowing() {
        assert_eq!(Value::Float64(0.5).as_f32().unwrap(), 0.5);
        assert_eq!(Value::Float64(0.1).as_f32().is_ok(), false);
        assert_eq!(Value::Float64(1e300).as_f32().is_ok(), false);
        assert!(Value::Float64(f64::NAN).as_f32().unwrap().is_nan());
        assert_eq!(Value::Float32(0.25).as_f64().unwrap(), 0.25);
    }

    #[test]
    fn test_non_numeric_sources() {
        assert!(Value::String("1".to_string()).as_i64().is_err());
        assert!(Value::Bool(true).as_i64().is_err());
        assert!(Value::Null.as_f64().is_err());
        assert!(Value::Bytes(bytes::Bytes::from_static(b"1")).as_u8().is_err());
    }
}
