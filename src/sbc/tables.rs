//! Constant tables for the SBC filterbank and bit allocator

/// Prototype filter coefficients for the 4-subband filterbank (40 taps)
pub const PROTO_4_40: [f64; 40] = [
    0.000_000_00e0,
    5.365_489_76e-4,
    1.491_883_57e-3,
    2.733_709_04e-3,
    3.837_201_93e-3,
    3.892_051_49e-3,
    1.865_816_91e-3,
    -3.060_122_86e-3,
    1.091_376_20e-2,
    2.043_850_87e-2,
    2.887_573_92e-2,
    3.219_392_90e-2,
    2.587_678_11e-2,
    6.132_451_86e-3,
    -2.882_172_74e-2,
    -7.764_634_94e-2,
    1.355_932_74e-1,
    1.949_878_41e-1,
    2.466_366_62e-1,
    2.818_282_03e-1,
    2.943_153_32e-1,
    2.818_282_03e-1,
    2.466_366_62e-1,
    1.949_878_41e-1,
    -1.355_932_74e-1,
    7.764_634_94e-2,
    2.882_172_74e-2,
    -6.132_451_86e-3,
    -2.587_678_11e-2,
    -3.219_392_90e-2,
    -2.887_573_92e-2,
    -2.043_850_87e-2,
    -1.091_376_20e-2,
    3.060_122_86e-3,
    -1.865_816_91e-3,
    -3.892_051_49e-3,
    -3.837_201_93e-3,
    -2.733_709_04e-3,
    -1.491_883_57e-3,
    -5.365_489_76e-4,
];

/// Prototype filter coefficients for the 8-subband filterbank (80 taps)
pub const PROTO_8_80: [f64; 80] = [
    0.000_000_00e0,
    1.565_753_98e-4,
    3.432_564_25e-4,
    5.546_202_02e-4,
    8.239_195_06e-4,
    1.139_925_07e-3,
    1.476_401_69e-3,
    1.783_717_25e-3,
    2.011_825_42e-3,
    2.103_719_89e-3,
    1.994_545_54e-3,
    1.616_562_83e-3,
    9.021_545_02e-4,
    -1.788_053_61e-4,
    -1.649_730_98e-3,
    -3.497_174_54e-3,
    5.659_494_73e-3,
    8.029_411_63e-3,
    1.045_844_43e-2,
    1.274_723_35e-2,
    1.465_252_63e-2,
    1.590_456_03e-2,
    1.622_084_71e-2,
    1.531_841_06e-2,
    1.293_718_06e-2,
    8.857_575_40e-3,
    2.924_084_42e-3,
    -4.915_780_24e-3,
    -1.464_040_76e-2,
    -2.610_987_52e-2,
    -3.907_513_81e-2,
    -5.318_730_32e-2,
    6.799_894_31e-2,
    8.298_475_78e-2,
    9.757_539_18e-2,
    1.111_966_89e-1,
    1.232_645_48e-1,
    1.332_644_15e-1,
    1.407_535_05e-1,
    1.453_898_47e-1,
    1.469_550_68e-1,
    1.453_898_47e-1,
    1.407_535_05e-1,
    1.332_644_15e-1,
    1.232_645_48e-1,
    1.111_966_89e-1,
    9.757_539_18e-2,
    8.298_475_78e-2,
    -6.799_894_31e-2,
    5.318_730_32e-2,
    3.907_513_81e-2,
    2.610_987_52e-2,
    1.464_040_76e-2,
    4.915_780_24e-3,
    -2.924_084_42e-3,
    -8.857_575_40e-3,
    -1.293_718_06e-2,
    -1.531_841_06e-2,
    -1.622_084_71e-2,
    -1.590_456_03e-2,
    -1.465_252_63e-2,
    -1.274_723_35e-2,
    -1.045_844_43e-2,
    -8.029_411_63e-3,
    -5.659_494_73e-3,
    3.497_174_54e-3,
    1.649_730_98e-3,
    1.788_053_61e-4,
    -9.021_545_02e-4,
    -1.616_562_83e-3,
    -1.994_545_54e-3,
    -2.103_719_89e-3,
    -2.011_825_42e-3,
    -1.783_717_25e-3,
    -1.476_401_69e-3,
    -1.139_925_07e-3,
    -8.239_195_06e-4,
    -5.546_202_02e-4,
    -3.432_564_25e-4,
    -1.565_753_98e-4,
];

/// Loudness bit-allocation offsets, 4 subbands, indexed by sampling
/// frequency (16/32/44.1/48 kHz) and subband
pub const LOUDNESS_OFFSET_4: [[i32; 4]; 4] = [
    [-1, 0, 0, 0],
    [-2, 0, 0, 1],
    [-2, 0, 0, 1],
    [-2, 0, 0, 1],
];

/// Loudness bit-allocation offsets, 8 subbands
pub const LOUDNESS_OFFSET_8: [[i32; 8]; 4] = [
    [-2, 0, 0, 0, 0, 0, 0, 1],
    [-3, 0, 0, 0, 0, 0, 1, 2],
    [-4, 0, 0, 0, 0, 0, 1, 2],
    [-4, 0, 0, 0, 0, 0, 1, 2],
];
