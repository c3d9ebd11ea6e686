pub mod core;
pub mod storage;
pub mod directory;
pub mod analysis;
pub mod index;
pub mod scoring;
pub mod query;
pub mod search;
pub mod handle;
pub mod parallel;
pub mod cluster;

/*
┌──────────────────────────────── CHUNKDEX LAYERS ────────────────────────────────┐
│                                                                                  │
│  SearchNode ── insert/update/remove ──► ChangeNotifier ──► WorkerPool            │
│      │                                      │                  │                 │
│      │ search                               │ broadcast        │ apply           │
│      ▼                                      ▼                  ▼                 │
│  IndexHandleCache ◄── ReopenScheduler   ClusterTransport   IndexWriter           │
│   • writer per index name                   │                  │                 │
│   • searcher snapshot per name              ▼                  ▼                 │
│                                       peer ClusterServer   VirtualDirectory      │
│                                       (current-thread      (segments_N, .seg,    │
│                                        tokio reactor)       .del, write.lock)    │
│                                                                │                 │
│                                                                ▼                 │
│                                                          VirtualFile             │
│                                                           chunk = pos / size     │
│                                                                │                 │
│                                                                ▼                 │
│                                                   ChunkStore (memory | fs)       │
│                                                    (file_id, chunk_no) → bytes   │
└──────────────────────────────────────────────────────────────────────────────────┘
*/
