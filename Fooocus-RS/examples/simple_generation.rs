//! Generate one image and save it next to the current directory.
//!
//! Requires a running Fooocus-API instance at http://127.0.0.1:8888.
//!
//! ```sh
//! cargo run --example simple_generation
//! ```

use fooocus_rs::{FooocusClient, JobPayload, JobStage, TextToImageParams};
use std::time::Duration;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let client = FooocusClient::new("http://127.0.0.1:8888");

    if !client.is_up().await {
        eprintln!("Fooocus-API is not reachable at {}", client.endpoint());
        return Ok(());
    }

    let params = TextToImageParams::new("a lighthouse on a cliff at dusk, oil painting")
        .aspect_ratio("896*1152")
        .performance("Speed");
    let job = client.submit(&JobPayload::TextToImage(params)).await?;
    println!("Submitted: {}", job.job_id);

    loop {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let snapshot = client.query_job(&job.job_id).await;
        match snapshot.stage {
            JobStage::Pending | JobStage::Running => {
                println!("  {} {:.0}%", snapshot.stage, snapshot.progress * 100.0);
            }
            JobStage::Completed => {
                for (i, image) in snapshot.images.iter().enumerate() {
                    let bytes = client.image_bytes(image).await?;
                    let name = format!("fooocus_{}.{}", i + 1, image.extension());
                    std::fs::write(&name, &bytes)?;
                    println!("Saved {} (seed {:?})", name, image.seed);
                }
                break;
            }
            JobStage::Error if snapshot.transient => {
                eprintln!("  status poll failed, retrying: {:?}", snapshot.error);
            }
            JobStage::Error => {
                eprintln!("Failed: {}", snapshot.error.unwrap_or_default());
                break;
            }
        }
    }

    Ok(())
}
