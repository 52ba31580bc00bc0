use crate::cache::PayloadCodec;
use crate::commands::CommandContext;

pub fn run(context: &CommandContext, elements: usize, width: usize) -> anyhow::Result<()> {
    let codec = PayloadCodec::from_settings(&context.config.cache);
    let records: Vec<String> = (0..elements)
        .map(|i| char::from(b'a' + (i % 26) as u8).to_string().repeat(width))
        .collect();

    let raw_size = serde_json::to_vec(&records)?.len();
    let (payload, compressed) = codec.encode_value(&records)?;
    let stored_size = serde_json::to_vec(&payload)?.len();

    let decoded: Vec<String> = codec.decode_value(payload)?;
    anyhow::ensure!(decoded == records, "decoded payload differs from the input");

    println!(
        "codec: {} bytes raw, {} bytes stored, compressed: {} (threshold {})",
        raw_size,
        stored_size,
        compressed,
        codec.threshold()
    );
    Ok(())
}
