pub mod preprocess;
pub mod processor;
pub mod trim;

pub use preprocess::{preprocess, FRAME_SAMPLES, SAMPLE_RATE};
pub use processor::{decode_wav, duration_ms, encode_wav, load_audio_file, load_recording, resample_to_16k};
pub use trim::{non_silent_span, trim_silence, TrimConfig};
