//! A pooled memcached text-protocol client for Tokio.
//!
//! ```ignore
//! use memtext_tokio::{Client, Pool, PoolConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PoolConfig::new(vec!["127.0.0.1:11211".into()]);
//! let pool = Pool::initialize(config).await?;
//! let client = Client::new(pool);
//!
//! client.set("hello", "world", 0).await?;
//! assert_eq!(Some("world".to_string()), client.get_string("hello").await?);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod conn;
pub mod pool;

pub use client::Client;
pub use config::PoolConfig;
pub use conn::SocketConn;
pub use pool::{Pool, PoolError};

pub use memtext_core::{Error, HashVariant};

#[cfg(test)]
mod e2e {
    use std::{
        collections::HashMap,
        io::{BufRead, BufReader},
        process::{Child, Command, Stdio},
    };

    use rand::prelude::*;

    use super::*;

    /// Spawns a throwaway `memcached` in Docker for the duration of a test,
    /// mirroring the teacher's own `MemcachedTester`.
    struct MemcachedTester {
        names: Vec<String>,
        procs: Vec<Child>,
    }

    impl MemcachedTester {
        fn new(port: usize) -> Self {
            let name = format!("memtext_test_{}", port);
            let proc = Self::new_proc(&name, port);
            Self {
                procs: vec![proc],
                names: vec![name],
            }
        }

        fn new_cluster(ports: Vec<usize>) -> Self {
            let (names, procs) = ports
                .into_iter()
                .map(|port| {
                    let name = format!("memtext_test_{}", port);
                    let proc = Self::new_proc(&name, port);
                    (name, proc)
                })
                .unzip();
            Self { procs, names }
        }

        fn new_proc(name: &str, port: usize) -> Child {
            let mut proc = Command::new("docker")
                .args([
                    "run",
                    "--rm",
                    "-t",
                    "--name",
                    name,
                    "-p",
                    &format!("{}:11211", port),
                    "memcached",
                    "memcached",
                    "-vv",
                ])
                .stdout(Stdio::piped())
                .spawn()
                .unwrap();

            let stdout = proc.stdout.as_mut().unwrap();
            let mut reader = BufReader::new(stdout);
            let mut buf = String::new();
            reader.read_line(&mut buf).unwrap();
            proc
        }
    }

    impl Drop for MemcachedTester {
        fn drop(&mut self) {
            for name in &self.names {
                let _ = Command::new("docker").args(["stop", name]).output();
            }
            for proc in &mut self.procs {
                let _ = proc.wait();
            }
        }
    }

    async fn exercise_client(client: Client) {
        for (k, v) in [
            ("key", "value"),
            ("hello", "world"),
            ("abc", "123"),
            ("dead", "beef"),
        ] {
            assert_eq!(None, client.get_string(k).await.unwrap());
            client.set_string(k, v, 0).await.unwrap();
            assert_eq!(Some(v.to_string()), client.get_string(k).await.unwrap());
            client.delete(k).await.unwrap();
            assert_eq!(None, client.get_string(k).await.unwrap());
        }

        client.store_counter("counter", 100, 0).await.unwrap();
        assert_eq!(101, client.incr("counter", 1).await.unwrap());
        assert_eq!(106, client.incr("counter", 5).await.unwrap());
        assert_eq!(102, client.decr("counter", 4).await.unwrap());
        assert_eq!(0, client.decr("counter", 1000).await.unwrap());

        let pairs: HashMap<&str, &str> =
            [("a", "1"), ("b", "2"), ("c", "3")].into_iter().collect();
        for (k, v) in &pairs {
            client.set_string(*k, v, 0).await.unwrap();
        }
        let keys = vec!["a", "b", "c", "missing"];
        let result: HashMap<Vec<u8>, String> = client.get_multi(&keys).await.unwrap();
        assert_eq!(pairs.len(), result.len());
        for (k, v) in &pairs {
            assert_eq!(*v, result.get(k.as_bytes()).unwrap());
        }

        client.flush_all().await.unwrap();
        assert_eq!(None, client.get_string("a").await.unwrap());
    }

    #[test]
    #[ignore = "requires docker and a memcached image"]
    fn test_single_server() {
        let mut rng = rand::thread_rng();
        let port = rng.gen_range(20000..30000);
        let _tester = MemcachedTester::new(port);
        tokio_test::block_on(async move {
            let config = PoolConfig::new(vec![format!("127.0.0.1:{}", port)]);
            let pool = Pool::initialize(config).await.unwrap();
            exercise_client(Client::new(pool)).await;
        });
    }

    #[test]
    #[ignore = "requires docker and a memcached image"]
    fn test_cluster_with_failover() {
        let mut rng = rand::thread_rng();
        let mut ports: Vec<usize> = (30001..40000).collect();
        ports.shuffle(&mut rng);
        let ports: Vec<usize> = ports[0..3].into();
        let _tester = MemcachedTester::new_cluster(ports.clone());
        tokio_test::block_on(async move {
            let servers = ports.iter().map(|p| format!("127.0.0.1:{}", p)).collect();
            let config = PoolConfig::new(servers);
            let pool = Pool::initialize(config).await.unwrap();
            exercise_client(Client::new(pool)).await;
        });
    }
}
