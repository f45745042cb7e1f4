use pagefork::{dom::Document, Engine, EngineOptions, RequestContext};

const PAGE: &str = r#"<html>
<head>
  <meta name="experiment" content="my-test">
  <meta name="experiment-variants" content="2">
</head>
<body>
  <main>
    <div><h1>Welcome</h1><p>Original content.</p></div>
  </main>
</body>
</html>"#;

#[tokio::main(flavor = "current_thread")]
async fn main() -> pagefork::Result<()> {
    env_logger::init();

    let options = EngineOptions::default()
        // This page does not publish a fragment manifest.
        .with_experiments_config_file("")
        .with_audience("mobile", || false)
        .with_tracking_function(|event, data| {
            println!("tracked {event}: {} -> {}", data.source, data.target);
        });
    let engine = Engine::new(options);

    let mut doc = Document::parse(PAGE);
    let ctx = RequestContext::parse("https://localhost/products/page?experiment=my-test/control")?;
    let outcome = engine.apply_modifications(&mut doc, &ctx).await;

    if let Some(experiment) = &outcome.experiment {
        println!(
            "experiment {} running={} selected={:?}",
            experiment.id, experiment.run, experiment.selected_variant
        );
    }
    println!("{}", doc.to_html());
    Ok(())
}
