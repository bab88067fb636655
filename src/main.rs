use anyhow::Context;
use chrono::Utc;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use whale::cli::{Action, Args, ConfigDiscovery, render};
use whale::container::image::pack_context;
use whale::container::{
    ContainerOrchestrator, LogOptions, NameCache, RegistryAuth, StopOptions,
};
use whale::stream::{LineRewriter, OutputChannel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "whale=debug"
    } else {
        "whale=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let action = args.action().map_err(anyhow::Error::msg)?;
    if let Action::ShowConfig = action {
        ConfigDiscovery::show_discovery_info();
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration override from: {:?}", path);
            ConfigDiscovery::load(path)?
        }
        None => ConfigDiscovery::discover_config()?,
    }
    .with_overrides(None, args.host.clone());

    let orchestrator =
        ContainerOrchestrator::with_config(config.client_config(), config.orchestrator_config())
            .await
            .context("Could not reach the container daemon")?;
    let images = orchestrator
        .images()
        .with_default_auth(config.registry.clone());

    match action {
        Action::Start {
            name,
            options,
            detach,
        } => {
            orchestrator.start(&name, &options).await?;
            if detach {
                println!("{}", name);
            } else {
                follow(&orchestrator, &name).await?;
            }
        }
        Action::Stop { name, options } => {
            orchestrator.stop(&name, &options).await?;
        }
        Action::Restart { name, options } => {
            orchestrator.restart(&name, &options).await?;
        }
        Action::Log { name, all } => {
            let output = orchestrator
                .logs(&name, &LogOptions { all, follow: true })
                .await?;
            tokio::select! {
                result = drain(output.stdout, output.stderr) => result?,
                _ = tokio::signal::ctrl_c() => debug!("Interrupted"),
            }
        }
        Action::Ps => {
            let rows = orchestrator.list().await?;
            print!("{}", render::containers(&rows, Utc::now()));
        }
        Action::Inspect { name } => {
            let detail = orchestrator.inspect(&name).await?;
            print!("{}", render::detail(&detail));
        }
        Action::Images => {
            let rows = images.list().await?;
            print!("{}", render::images(&rows, Utc::now()));
        }
        Action::Pull { image } => {
            let views = images.pull(&image, &RegistryAuth::default()).await?;
            show_progress(views).await?;
        }
        Action::Push { image } => {
            let views = images.push(&image, &RegistryAuth::default()).await?;
            show_progress(views).await?;
        }
        Action::Build {
            image,
            context,
            options,
        } => {
            let archive = tokio::task::spawn_blocking(move || pack_context(&context))
                .await
                .context("Packing the build context panicked")??;
            let mut output = images.build(&image, archive, &options).await?;
            while let Some(text) = output.next().await {
                print!("{}", text?);
            }
        }
        Action::Remove { image } => {
            images.remove(&image).await?;
        }
        Action::Clean => {
            let report = orchestrator.clean().await?;
            println!(
                "Removed {} images and {} containers",
                report.images_removed, report.containers_removed
            );
        }
        Action::Events { names } => {
            let cache = names.then(NameCache::new);
            let mut events = orchestrator.events(cache).await?;
            loop {
                tokio::select! {
                    next = events.next() => match next {
                        Some(event) => println!("{}", render::event(&event?)),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        Action::Ping => {
            let runtime = orchestrator.engine().runtime_type().await?;
            println!("{} daemon is reachable", runtime);
        }
        Action::ShowConfig => {}
    }

    Ok(())
}

/// Stream a started container's output until it exits; Ctrl-C stops it.
async fn follow(
    orchestrator: &ContainerOrchestrator,
    name: &str,
) -> anyhow::Result<()> {
    let output = orchestrator
        .attach(
            name,
            &LogOptions {
                all: true,
                follow: true,
            },
        )
        .await?;

    tokio::select! {
        result = drain(output.stdout, output.stderr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping {}", name);
            orchestrator.stop(name, &StopOptions::forced()).await?;
            Ok(())
        }
    }
}

async fn drain(stdout: OutputChannel, stderr: OutputChannel) -> anyhow::Result<()> {
    let (out, err) = tokio::join!(
        copy(stdout, tokio::io::stdout()),
        copy(stderr, tokio::io::stderr())
    );
    out?;
    err
}

async fn copy<W: AsyncWrite + Unpin>(mut channel: OutputChannel, mut out: W) -> anyhow::Result<()> {
    while let Some(chunk) = channel.next().await {
        out.write_all(&chunk?).await?;
        out.flush().await?;
    }
    Ok(())
}

async fn show_progress(
    mut views: futures::stream::BoxStream<'static, whale::container::Result<String>>,
) -> anyhow::Result<()> {
    let mut rewriter = LineRewriter::new(std::io::stdout());
    while let Some(view) = views.next().await {
        match view {
            Ok(view) => rewriter.draw(&view)?,
            Err(e) => {
                warn!("{}", e);
                return Err(e.into());
            }
        }
    }
    Ok(())
}
