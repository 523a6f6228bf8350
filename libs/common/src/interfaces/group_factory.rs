use alloy_sol_types::sol;

sol! {
    /// Deploys a token and treasury pair for each new group
    interface IGroupFactory {
        event GroupCreated(
            address indexed tokenAddress,
            address indexed treasuryAddress,
            address indexed creator,
            string name,
            string symbol,
            string charterCid,
            bool isPublic
        );

        function createGroup(string calldata name, string calldata symbol, string calldata charterCid, bool isPublic) external returns (address tokenAddress, address treasuryAddress);

        function isGroup(address token) external view returns (bool);

        function groupCount() external view returns (uint256);
    }
}
