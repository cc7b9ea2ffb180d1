#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rand::{Rng, SeedableRng};
    use std::time::Duration;

    use crate::errors::DavError;
    use crate::services::webdav::tests::{staged_paths, url, writer, writer_with};
    use crate::services::webdav::{Operation, ReplaceStrategy};

    #[tokio::test]
    async fn test_write_new_file() {
        let (conn, writer) = writer();
        writer.create_container_with_ancestors(&url("/acct/Docs/")).await.unwrap();

        let final_url = writer
            .write_data_to_url_atomically(
                "first draft",
                url("/acct/Docs/report.txt"),
                url("/acct/.tmp/"),
                url("/acct/"),
                false,
            )
            .await
            .expect("write should succeed");

        assert_eq!(final_url, url("/acct/Docs/report.txt"));
        assert_eq!(conn.read(&final_url).unwrap(), Bytes::from("first draft"));
        // Moved, not copied
        assert!(staged_paths(&conn).is_empty());
        assert!(conn.is_container(&url("/acct/.tmp/")));
    }

    #[tokio::test]
    async fn test_task_reports_destination_and_completion() {
        let (_conn, writer) = writer();
        writer.create_container_with_ancestors(&url("/acct/Docs/")).await.unwrap();

        let task = writer.write_data_to_url_atomically(
            "tracked",
            url("/acct/Docs/tracked.txt"),
            url("/acct/.tmp/"),
            url("/acct/"),
            false,
        );
        assert_eq!(task.destination(), &url("/acct/Docs/tracked.txt"));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !task.is_finished() {
            assert!(tokio::time::Instant::now() < deadline, "write never finished");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(task.await.unwrap(), url("/acct/Docs/tracked.txt"));
    }

    /// 1024 bytes onto an existing file without overwrite
    #[tokio::test]
    async fn test_existing_destination_without_overwrite_is_conflict() {
        let (conn, writer) = writer();
        conn.insert_file(&url("/acct/Docs/report.txt"), "original");

        let result = writer
            .write_data_to_url_atomically(
                vec![7u8; 1024],
                url("/acct/Docs/report.txt"),
                url("/acct/.tmp/"),
                url("/acct/"),
                false,
            )
            .await;

        assert!(matches!(result, Err(DavError::Conflict { .. })), "got {:?}", result);
        assert_eq!(conn.read(&url("/acct/Docs/report.txt")).unwrap(), Bytes::from("original"));

        // The staged upload stays for a higher-level retry
        let staged = staged_paths(&conn);
        assert_eq!(staged.len(), 1);
        assert!(staged[0].ends_with("-report.txt.davwrite-staging"));
    }

    #[tokio::test]
    async fn test_overwrite_with_atomic_move() {
        let (conn, writer) = writer();
        conn.insert_file(&url("/acct/Docs/report.txt"), "old old old old old");

        writer
            .write_data_to_url_atomically(
                "new",
                url("/acct/Docs/report.txt"),
                url("/acct/.tmp/"),
                url("/acct/"),
                true,
            )
            .await
            .unwrap();

        assert_eq!(conn.read(&url("/acct/Docs/report.txt")).unwrap(), Bytes::from("new"));
        assert!(staged_paths(&conn).is_empty());

        let publishing_moves: Vec<_> = conn
            .calls()
            .into_iter()
            .filter(|c| c.operation == Operation::Move)
            .collect();
        assert_eq!(publishing_moves.len(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_with_move_aside() {
        let (conn, writer) = writer_with(ReplaceStrategy::MoveAside);
        conn.insert_file(&url("/acct/Docs/report.txt"), "old");

        writer
            .write_data_to_url_atomically(
                "replacement",
                url("/acct/Docs/report.txt"),
                url("/acct/.tmp/"),
                url("/acct/"),
                true,
            )
            .await
            .unwrap();

        assert_eq!(conn.read(&url("/acct/Docs/report.txt")).unwrap(), Bytes::from("replacement"));
        assert!(!conn.exists(&url("/acct/Docs/report.txt.davwrite-aside")));
        assert!(staged_paths(&conn).is_empty());

        let moves: Vec<_> = conn
            .calls()
            .into_iter()
            .filter(|c| c.operation == Operation::Move)
            .collect();
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[0].url, url("/acct/Docs/report.txt").to_string());
        assert_eq!(
            moves[0].destination.as_deref(),
            Some(url("/acct/Docs/report.txt.davwrite-aside").as_str())
        );
    }

    #[tokio::test]
    async fn test_move_aside_without_previous_content() {
        let (conn, writer) = writer_with(ReplaceStrategy::MoveAside);
        writer.create_container_with_ancestors(&url("/acct/Docs/")).await.unwrap();

        writer
            .write_data_to_url_atomically(
                "fresh",
                url("/acct/Docs/new.txt"),
                url("/acct/.tmp/"),
                url("/acct/"),
                true,
            )
            .await
            .unwrap();

        assert_eq!(conn.read(&url("/acct/Docs/new.txt")).unwrap(), Bytes::from("fresh"));
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_destination_untouched() {
        let (conn, writer) = writer();
        conn.insert_file(&url("/acct/Docs/report.txt"), "original");
        conn.inject_failure(Operation::Put, DavError::Connection { details: "broken pipe".to_string() });

        let result = writer
            .write_data_to_url_atomically(
                "new",
                url("/acct/Docs/report.txt"),
                url("/acct/.tmp/"),
                url("/acct/"),
                true,
            )
            .await;

        assert!(matches!(result, Err(DavError::Connection { .. })));
        assert_eq!(conn.read(&url("/acct/Docs/report.txt")).unwrap(), Bytes::from("original"));
        assert_eq!(conn.count_calls(Operation::Move), 0);
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_staged_file() {
        let (conn, writer) = writer();
        conn.inject_failure(Operation::Move, DavError::Connection { details: "timeout".to_string() });

        let result = writer
            .write_data_to_url_atomically(
                "payload",
                url("/acct/Docs/report.txt"),
                url("/acct/.tmp/"),
                url("/acct/"),
                false,
            )
            .await;

        assert!(result.is_err());
        assert!(!conn.exists(&url("/acct/Docs/report.txt")));
        let staged = staged_paths(&conn);
        assert_eq!(staged.len(), 1);
    }

    #[tokio::test]
    async fn test_staging_outside_account_is_rejected() {
        let (conn, writer) = writer();

        let result = writer
            .write_data_to_url_atomically(
                "x",
                url("/acct/Docs/report.txt"),
                url("/other/.tmp/"),
                url("/acct/"),
                false,
            )
            .await;

        assert!(matches!(result, Err(DavError::InvalidUrl { .. })));
        assert!(conn.calls().is_empty());
    }

    #[tokio::test]
    async fn test_directory_destination_is_rejected() {
        let (_conn, writer) = writer();

        let result = writer
            .write_data_to_url_atomically(
                "x",
                url("/acct/Docs/"),
                url("/acct/.tmp/"),
                url("/acct/"),
                false,
            )
            .await;

        assert!(matches!(result, Err(DavError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_write_never_publishes() {
        let (conn, writer) = writer();
        conn.set_put_latency(Duration::from_millis(300));

        let task = writer.write_data_to_url_atomically(
            "never visible",
            url("/acct/Docs/report.txt"),
            url("/acct/.tmp/"),
            url("/acct/"),
            false,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.cancel();

        let result = task.await;
        assert!(matches!(result, Err(DavError::Cancelled { .. })), "got {:?}", result);
        assert_eq!(conn.count_calls(Operation::Move), 0);
        assert!(!conn.exists(&url("/acct/Docs/report.txt")));
    }

    #[tokio::test]
    async fn test_dropping_the_task_cancels_it() {
        let (conn, writer) = writer();
        conn.set_put_latency(Duration::from_millis(200));

        let task = writer.write_data_to_url_atomically(
            "abandoned",
            url("/acct/Docs/report.txt"),
            url("/acct/.tmp/"),
            url("/acct/"),
            false,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(task);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(conn.count_calls(Operation::Move), 0);
        assert!(!conn.exists(&url("/acct/Docs/report.txt")));
    }

    /// Concurrent writes to distinct destinations never see each other's bytes
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_keep_their_own_bytes() {
        let (conn, writer) = writer();
        writer.create_container_with_ancestors(&url("/acct/Docs/")).await.unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        let payloads: Vec<Vec<u8>> = (0..24)
            .map(|_| {
                let len = rng.gen_range(1..4096);
                (0..len).map(|_| rng.gen()).collect()
            })
            .collect();

        let tasks: Vec<_> = payloads
            .iter()
            .enumerate()
            .map(|(i, payload)| {
                writer.write_data_to_url_atomically(
                    payload.clone(),
                    url(&format!("/acct/Docs/file-{}.bin", i)),
                    url("/acct/.tmp/"),
                    url("/acct/"),
                    false,
                )
            })
            .collect();

        let results = futures::future::join_all(tasks).await;

        for (i, result) in results.into_iter().enumerate() {
            let final_url = result.expect("every write should succeed");
            assert_eq!(conn.read(&final_url).unwrap(), Bytes::from(payloads[i].clone()));
        }
        assert!(staged_paths(&conn).is_empty());
    }

    /// Racing writers on one destination: exactly one wins without overwrite,
    /// and the winner's bytes are intact
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_writers_on_one_destination() {
        let (conn, writer) = writer();
        writer.create_container_with_ancestors(&url("/acct/Docs/")).await.unwrap();

        let tasks: Vec<_> = (0..8u8)
            .map(|i| {
                writer.write_data_to_url_atomically(
                    vec![i; 512],
                    url("/acct/Docs/contended.bin"),
                    url("/acct/.tmp/"),
                    url("/acct/"),
                    false,
                )
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let winners = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(DavError::Conflict { .. })))
            .count();

        assert_eq!(winners, 1);
        assert_eq!(conflicts, 7);

        let content = conn.read(&url("/acct/Docs/contended.bin")).unwrap();
        assert_eq!(content.len(), 512);
        assert!(content.iter().all(|b| *b == content[0]));
    }
}
