use anyhow::Result;
use std::path::PathBuf;

use hulk_core::serializer::{FramedSerializer, JsonSerializer, Serializer};
use hulk_core::snapshot::read_blocks;

pub fn exec(file: PathBuf, framed: bool, json: bool) -> Result<()> {
    let codec: Box<dyn Serializer> = if framed {
        Box::new(FramedSerializer::new(JsonSerializer))
    } else {
        Box::new(JsonSerializer)
    };
    let blocks = read_blocks(&file, codec.as_ref())?;

    if json {
        for b in &blocks {
            println!("{}", serde_json::to_string(&b.context)?);
        }
        return Ok(());
    }

    println!("{}: {} block(s), codec {}", file.display(), blocks.len(), codec.name());
    for b in &blocks {
        let ctx = &b.context;
        println!(
            "  @{:<10} +{:<8} {}  {:?}{}",
            b.offset,
            b.len,
            ctx.activity_id(),
            ctx.status(),
            match ctx.last_error() {
                Some(e) => format!("  last_error={}", e),
                None => String::new(),
            }
        );
    }
    Ok(())
}
